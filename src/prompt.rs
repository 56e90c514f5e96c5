//! Instruction payloads for the generative agent.

use std::fmt::Write as _;

use crate::project::{MIGRATIONS_DIR, ProjectState, SEEDS_DIR, slugify};
use crate::validate::{Step, ValidationFailure};

/// Built-in system prompt.
pub const SYSTEM_PROMPT: &str = include_str!("../prompts/system-prompt.md");

/// The user's idea and the project it applies to.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub idea: String,
    pub state: ProjectState,
    /// Timestamp the new migration/seed pair must carry.
    pub timestamp: String,
}

impl GenerationRequest {
    pub fn new(idea: impl Into<String>, state: ProjectState, timestamp: impl Into<String>) -> Self {
        Self {
            idea: idea.into(),
            state,
            timestamp: timestamp.into(),
        }
    }
}

/// What the previous attempt got wrong.
#[derive(Debug, Clone)]
pub struct Correction {
    pub failure: ValidationFailure,
    /// Files to fix in place, when the previous attempt produced a valid pair.
    pub migration_file: Option<String>,
    pub seed_file: Option<String>,
}

/// Opaque payload handed to an [`Agent`](crate::agent::Agent).
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub system_prompt: String,
    pub user_prompt: String,
    pub attempt: u32,
    pub timestamp: String,
}

/// Build the instruction for an attempt. Pure.
pub fn compose(
    request: &GenerationRequest,
    system_prompt: &str,
    attempt: u32,
    correction: Option<&Correction>,
) -> Instruction {
    let mut prompt = String::new();
    let state = &request.state;

    let _ = writeln!(prompt, "# Application idea\n\n{}\n", request.idea.trim());

    let _ = writeln!(prompt, "# Current project state\n");
    write_listing(&mut prompt, MIGRATIONS_DIR, &state.migration_names());
    write_listing(&mut prompt, SEEDS_DIR, &state.seed_names());
    let _ = writeln!(
        prompt,
        "Latest timestamp: {}\n",
        state.latest_timestamp().unwrap_or("none")
    );

    let _ = writeln!(prompt, "# Task\n");
    let _ = writeln!(
        prompt,
        "Use timestamp {ts}. Create {m}/{ts}_<slug>.sql and {s}/{ts}_<slug>.sql.",
        ts = request.timestamp,
        m = MIGRATIONS_DIR,
        s = SEEDS_DIR
    );
    let _ = writeln!(
        prompt,
        "Suggested slug: {} (use a shorter one if it reads better).",
        slugify(&request.idea)
    );

    if let Some(correction) = correction {
        write_correction(&mut prompt, correction);
    }

    Instruction {
        system_prompt: system_prompt.to_string(),
        user_prompt: prompt,
        attempt,
        timestamp: request.timestamp.clone(),
    }
}

fn write_listing(prompt: &mut String, dir: &str, names: &[&str]) {
    if names.is_empty() {
        let _ = writeln!(prompt, "{}/: (empty)", dir);
        return;
    }
    let _ = writeln!(prompt, "{}/:", dir);
    for name in names {
        let _ = writeln!(prompt, "- {}", name);
    }
}

fn write_correction(prompt: &mut String, correction: &Correction) {
    let failure = &correction.failure;
    let _ = writeln!(prompt, "\n# Previous attempt failed\n");
    let _ = write!(prompt, "Step: {}", failure.step);
    if let Some(file) = &failure.file {
        let _ = write!(prompt, " ({})", file.display());
    }
    if let Some(code) = failure.exit_code {
        let _ = write!(prompt, ", exit code {}", code);
    }
    let _ = writeln!(prompt, "\n\n```\n{}\n```\n", failure.output.trim_end());

    match (&correction.migration_file, &correction.seed_file) {
        (Some(migration), Some(seed)) => {
            let _ = writeln!(
                prompt,
                "Fix the files in place: {}/{} and {}/{}. Do not create any other files.",
                MIGRATIONS_DIR, migration, SEEDS_DIR, seed
            );
            let target = match failure.step {
                Step::ApplySeed => "The error comes from the seed: fix the seed and leave the migration unchanged.",
                Step::ApplyMigration => "The error comes from a migration: fix the new migration, then make sure the seed still matches it.",
                _ => "Fix whichever of the two files caused the error.",
            };
            let _ = writeln!(prompt, "{}", target);
        }
        _ => {
            let _ = writeln!(
                prompt,
                "Remove any new files you wrote that break these rules, then produce exactly one migration and one seed as described above."
            );
        }
    }
}
