//! pgidea - build PostgreSQL migrations and seeds from an app idea.

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use colored::*;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use pgidea::agent::ClaudeAgent;
use pgidea::interrupt::Interrupt;
use pgidea::present::{LivePresenter, LogPresenter};
use pgidea::prompt::SYSTEM_PROMPT;
use pgidea::validate::{PgCliTools, ValidationRunner, ensure_on_path};
use pgidea::{
    Config, GenerationRequest, IdeaError, IdeaResult, ProjectState, RetryController, RunReport,
};

/// Build PostgreSQL migrations and seeds from your app idea.
///
/// A coding agent writes the SQL, which is then applied to a throwaway
/// database. Failures are fed back to the agent until the files load cleanly.
#[derive(Debug, Parser)]
#[command(name = "pgidea", version, about)]
struct Cli {
    /// Path where migrations and seeds will be created
    #[arg(short, long)]
    project_path: PathBuf,

    /// The application idea (prompted for when omitted)
    #[arg(short, long)]
    idea: Option<String>,

    /// Total generation attempts, including the first
    #[arg(short = 'n', long, env = "PGIDEA_MAX_ATTEMPTS")]
    max_attempts: Option<u32>,

    /// Configuration file (default: <project>/pgidea.toml, then the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Model passed to the agent
    #[arg(long, env = "PGIDEA_MODEL")]
    model: Option<String>,

    /// Log progress instead of drawing a live view
    #[arg(long)]
    plain: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.plain);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = match err.downcast_ref::<IdeaError>() {
                Some(idea_err) => {
                    report_failure(idea_err);
                    idea_err.exit_code()
                }
                None => {
                    eprintln!("{} {:#}", "✗".red().bold(), err);
                    1
                }
            };
            ExitCode::from(code)
        }
    }
}

fn init_tracing(plain: bool) {
    let default = if plain { "pgidea=info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let root = &cli.project_path;
    if !root.exists() {
        std::fs::create_dir_all(root).map_err(|e| IdeaError::fs(root, e))?;
        println!("{}", format!("{} created", root.display()).green());
        println!();
    }

    let config = load_config(&cli)?;
    let system_prompt = load_system_prompt(&config, root)?;

    let tools = PgCliTools::new(&config.database);
    ensure_on_path(std::iter::once(config.agent.program.as_str()).chain(tools.programs()))?;

    let state = ProjectState::scan(root)?;
    tracing::info!(
        migrations = state.migrations.len(),
        seeds = state.seeds.len(),
        latest = state.latest_timestamp().unwrap_or("none"),
        "scanned project"
    );

    let idea = match cli.idea.as_deref() {
        Some(idea) => idea.trim().to_string(),
        None => prompt_idea()?,
    };
    if idea.is_empty() {
        return Err(IdeaError::Config("the idea must not be empty".into()).into());
    }

    let timestamp = state.next_timestamp(Local::now());
    let request = GenerationRequest::new(idea, state, timestamp);

    let interrupt = Interrupt::on_ctrl_c();
    let agent = ClaudeAgent::new(&config.agent, root.clone());
    let runner = ValidationRunner::new(tools, config.database.name_prefix.clone(), interrupt.clone());
    let controller = RetryController::new(
        agent,
        runner,
        system_prompt,
        config.max_attempts,
        interrupt,
    );

    let live = !cli.plain && std::io::stdout().is_terminal();
    let report = if live {
        controller.run(&request, LivePresenter::new()).await?
    } else {
        controller.run(&request, LogPresenter::printing_report()).await?
    };

    report_success(&report, config.max_attempts);
    Ok(())
}

/// Config file, then command-line overrides.
fn load_config(cli: &Cli) -> IdeaResult<Config> {
    let mut config = Config::load(&cli.project_path, cli.config.as_deref())?;
    if let Some(max_attempts) = cli.max_attempts {
        config.max_attempts = max_attempts;
    }
    if let Some(model) = &cli.model {
        config.agent.model = Some(model.clone());
    }
    config.validate()?;
    Ok(config)
}

fn load_system_prompt(config: &Config, root: &Path) -> IdeaResult<String> {
    let Some(path) = &config.agent.system_prompt else {
        return Ok(SYSTEM_PROMPT.to_string());
    };
    let path = if path.is_relative() && !path.exists() {
        root.join(path)
    } else {
        path.clone()
    };
    tracing::info!(path = %path.display(), "using custom system prompt");
    std::fs::read_to_string(&path).map_err(|e| IdeaError::fs(path, e))
}

fn prompt_idea() -> Result<String> {
    let mut editor = DefaultEditor::new().context("failed to open line editor")?;
    match editor.readline("Describe your idea: ") {
        Ok(line) => {
            println!();
            Ok(line.trim().to_string())
        }
        Err(ReadlineError::Interrupted | ReadlineError::Eof) => Err(IdeaError::Interrupted.into()),
        Err(e) => Err(e).context("failed to read idea"),
    }
}

fn report_success(report: &RunReport, max_attempts: u32) {
    let artifacts = &report.artifacts;
    println!();
    println!("{}", "✓ Migration and seed validated".green().bold());
    println!("  Migration: {}", artifacts.migration.path.display().to_string().cyan());
    println!("  Seed:      {}", artifacts.seed.path.display().to_string().cyan());
    println!(
        "  {}",
        format!(
            "Checked against {} (attempt {}/{})",
            report.outcome.database, report.attempts, max_attempts
        )
        .dimmed()
    );
}

fn report_failure(err: &IdeaError) {
    eprintln!();
    match err {
        IdeaError::RetryExhausted { attempts, last } => {
            eprintln!(
                "{}",
                format!("✗ No valid SQL after {} attempt(s)", attempts).red().bold()
            );
            eprintln!("  Failed step: {}", last.step.to_string().yellow());
            if let Some(file) = &last.file {
                eprintln!("  File:        {}", file.display());
            }
            if let Some(code) = last.exit_code {
                eprintln!("  Exit code:   {}", code);
            }
            eprintln!("{}", "━".repeat(50).dimmed());
            eprintln!("{}", last.output);
            eprintln!("{}", "━".repeat(50).dimmed());
            eprintln!("  The unvalidated files were removed; the project is unchanged.");
        }
        IdeaError::Interrupted => eprintln!("{}", "✗ Interrupted".yellow().bold()),
        other => eprintln!("{} {}", "✗".red().bold(), other.to_string().red()),
    }
}
