//! Disposable-database validation.
//!
//! A run creates `<prefix>_<YYYYMMDDHHMMSS>`, applies every migration and
//! seed in timestamp order (the new pair last), and drops the database on
//! every exit path, including failures and Ctrl-C.

mod tools;

pub use tools::{CommandOutput, DatabaseTools, PgCliTools, ensure_on_path, find_on_path};

use chrono::{DateTime, Local};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::interrupt::Interrupt;
use crate::project::{SqlKind, TIMESTAMP_FORMAT};

/// Which part of a validation attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The generated files themselves broke the layout rules
    Artifacts,
    CreateDatabase,
    ApplyMigration,
    ApplySeed,
    DropDatabase,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Artifacts => "artifact check",
            Step::CreateDatabase => "create database",
            Step::ApplyMigration => "apply migration",
            Step::ApplySeed => "apply seed",
            Step::DropDatabase => "drop database",
        };
        f.write_str(name)
    }
}

/// The first failing step of an attempt, with the raw tool output.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationFailure {
    pub step: Step,
    pub file: Option<PathBuf>,
    pub exit_code: Option<i32>,
    pub output: String,
}

impl ValidationFailure {
    pub fn new(
        step: Step,
        file: Option<PathBuf>,
        exit_code: Option<i32>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            step,
            file,
            exit_code,
            output: output.into(),
        }
    }

    fn from_output(step: Step, file: Option<&Path>, output: &CommandOutput) -> Self {
        Self::new(
            step,
            file.map(Path::to_path_buf),
            output.code,
            output.error_text(),
        )
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed", self.step)?;
        if let Some(file) = &self.file {
            write!(f, " on {}", file.display())?;
        }
        if let Some(code) = self.exit_code {
            write!(f, " (exit code {})", code)?;
        }
        write!(f, ":\n{}", self.output)
    }
}

/// One external command that ran during validation.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub step: Step,
    pub file: Option<PathBuf>,
    pub success: bool,
    pub elapsed: Duration,
}

impl StepReport {
    fn new(step: Step, file: Option<&Path>, output: &CommandOutput) -> Self {
        Self {
            step,
            file: file.map(Path::to_path_buf),
            success: output.success(),
            elapsed: output.elapsed,
        }
    }
}

/// Result of one validation attempt. Never persisted.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    /// Empty when no database was created (artifact check failed).
    pub database: String,
    pub steps: Vec<StepReport>,
    pub failure: Option<ValidationFailure>,
    pub interrupted: bool,
}

impl ValidationOutcome {
    pub fn is_success(&self) -> bool {
        self.failure.is_none() && !self.interrupted
    }

    /// Outcome for generated files that never reached a database.
    pub fn artifact_failure(message: impl Into<String>) -> Self {
        Self {
            database: String::new(),
            steps: Vec::new(),
            failure: Some(ValidationFailure::new(Step::Artifacts, None, None, message)),
            interrupted: false,
        }
    }
}

/// Ordered SQL files to load into the disposable database.
#[derive(Debug, Clone, Default)]
pub struct ValidationPlan {
    pub files: Vec<(SqlKind, PathBuf)>,
    /// Migration applied a second time right after its first apply.
    pub rerun: Option<PathBuf>,
}

impl ValidationPlan {
    pub fn new(files: Vec<(SqlKind, PathBuf)>) -> Self {
        Self { files, rerun: None }
    }

    /// Require `migration` to survive being applied twice.
    pub fn rerunning(mut self, migration: impl Into<PathBuf>) -> Self {
        self.rerun = Some(migration.into());
        self
    }
}

/// `<prefix>_<YYYYMMDDHHMMSS>`. Unique per second per host, no better.
pub fn disposable_name(prefix: &str, now: DateTime<Local>) -> String {
    format!("{}_{}", prefix, now.format(TIMESTAMP_FORMAT))
}

/// Runs a plan against a fresh disposable database.
pub struct ValidationRunner<T> {
    tools: T,
    prefix: String,
    interrupt: Interrupt,
}

impl<T: DatabaseTools> ValidationRunner<T> {
    pub fn new(tools: T, prefix: impl Into<String>, interrupt: Interrupt) -> Self {
        Self {
            tools,
            prefix: prefix.into(),
            interrupt,
        }
    }

    pub fn tools(&self) -> &T {
        &self.tools
    }

    pub async fn validate(&self, plan: &ValidationPlan) -> ValidationOutcome {
        let database = disposable_name(&self.prefix, Local::now());
        self.validate_in(&database, plan).await
    }

    /// Validate using an explicit database name.
    pub async fn validate_in(&self, database: &str, plan: &ValidationPlan) -> ValidationOutcome {
        tracing::info!(database, files = plan.files.len(), "validating");

        let mut steps = Vec::new();
        let mut interrupt = self.interrupt.clone();
        let mut interrupted = false;

        let failure = tokio::select! {
            biased;
            _ = interrupt.wait() => {
                interrupted = true;
                None
            }
            failure = self.load(database, plan, &mut steps) => failure,
        };

        // Cleanup runs on every path.
        let dropped = self.tools.drop_database(database).await;
        steps.push(StepReport::new(Step::DropDatabase, None, &dropped));
        if !dropped.success() {
            tracing::warn!(
                database,
                error = %dropped.error_text(),
                "failed to drop disposable database"
            );
        }

        let failure = match failure {
            Some(failure) => Some(failure),
            None if !dropped.success() && !interrupted => Some(ValidationFailure::from_output(
                Step::DropDatabase,
                None,
                &dropped,
            )),
            None => None,
        };

        ValidationOutcome {
            database: database.to_string(),
            steps,
            failure,
            interrupted,
        }
    }

    async fn load(
        &self,
        database: &str,
        plan: &ValidationPlan,
        steps: &mut Vec<StepReport>,
    ) -> Option<ValidationFailure> {
        let created = self.tools.create_database(database).await;
        steps.push(StepReport::new(Step::CreateDatabase, None, &created));
        if !created.success() {
            return Some(ValidationFailure::from_output(
                Step::CreateDatabase,
                None,
                &created,
            ));
        }

        for (kind, file) in &plan.files {
            let (step, output) = match kind {
                SqlKind::Migration => (
                    Step::ApplyMigration,
                    self.tools.apply_migration(database, file).await,
                ),
                SqlKind::Seed => (Step::ApplySeed, self.tools.run_sql_file(database, file).await),
            };
            steps.push(StepReport::new(step, Some(file), &output));
            tracing::debug!(%step, file = %file.display(), ok = output.success(), "step finished");
            if !output.success() {
                return Some(ValidationFailure::from_output(step, Some(file), &output));
            }

            if *kind == SqlKind::Migration && plan.rerun.as_deref() == Some(file.as_path()) {
                let again = self.tools.apply_migration(database, file).await;
                steps.push(StepReport::new(Step::ApplyMigration, Some(file), &again));
                tracing::debug!(file = %file.display(), ok = again.success(), "migration re-applied");
                if !again.success() {
                    let mut failure =
                        ValidationFailure::from_output(Step::ApplyMigration, Some(file), &again);
                    failure.output = format!(
                        "the migration is not idempotent: applying it a second time failed\n{}",
                        failure.output
                    );
                    return Some(failure);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeTools {
        calls: Mutex<Vec<String>>,
        fail_on: Option<String>,
        hang_on: Option<String>,
        /// Fail any call identical to an earlier one.
        fail_on_repeat: bool,
    }

    impl FakeTools {
        async fn record(&self, call: String) -> CommandOutput {
            let repeated = {
                let mut calls = self.calls.lock().unwrap();
                let repeated = calls.contains(&call);
                calls.push(call.clone());
                repeated
            };
            if self.hang_on.as_deref().is_some_and(|h| call.contains(h)) {
                std::future::pending::<()>().await;
            }
            if self.fail_on.as_deref().is_some_and(|f| call.contains(f))
                || (self.fail_on_repeat && repeated)
            {
                CommandOutput {
                    code: Some(3),
                    stderr: format!("ERROR:  {} exploded", call),
                    ..Default::default()
                }
            } else {
                CommandOutput {
                    code: Some(0),
                    ..Default::default()
                }
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DatabaseTools for FakeTools {
        async fn create_database(&self, name: &str) -> CommandOutput {
            self.record(format!("create {}", name)).await
        }

        async fn apply_migration(&self, database: &str, path: &Path) -> CommandOutput {
            self.record(format!("migrate {} {}", database, path.display())).await
        }

        async fn run_sql_file(&self, database: &str, file: &Path) -> CommandOutput {
            self.record(format!("seed {} {}", database, file.display())).await
        }

        async fn drop_database(&self, name: &str) -> CommandOutput {
            self.record(format!("drop {}", name)).await
        }
    }

    fn plan() -> ValidationPlan {
        ValidationPlan::new(vec![
            (SqlKind::Migration, PathBuf::from("migrations/1_blog.sql")),
            (SqlKind::Seed, PathBuf::from("seeds/1_blog.sql")),
        ])
    }

    #[test]
    fn test_disposable_name() {
        let now = Local.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(disposable_name("pgidea_validate", now), "pgidea_validate_20250304050607");
    }

    #[tokio::test]
    async fn test_success_runs_steps_in_order_and_drops() {
        let runner = ValidationRunner::new(FakeTools::default(), "v", Interrupt::never());
        let outcome = runner.validate_in("v_1", &plan()).await;

        assert!(outcome.is_success());
        assert_eq!(
            runner.tools().calls(),
            vec![
                "create v_1",
                "migrate v_1 migrations/1_blog.sql",
                "seed v_1 seeds/1_blog.sql",
                "drop v_1",
            ]
        );
        assert_eq!(outcome.steps.len(), 4);
    }

    #[tokio::test]
    async fn test_migration_failure_skips_seed_but_still_drops() {
        let tools = FakeTools {
            fail_on: Some("migrate".into()),
            ..Default::default()
        };
        let runner = ValidationRunner::new(tools, "v", Interrupt::never());
        let outcome = runner.validate_in("v_1", &plan()).await;

        let failure = outcome.failure.clone().unwrap();
        assert_eq!(failure.step, Step::ApplyMigration);
        assert_eq!(failure.exit_code, Some(3));
        assert_eq!(failure.file, Some(PathBuf::from("migrations/1_blog.sql")));
        assert!(failure.output.contains("exploded"));
        assert_eq!(
            runner.tools().calls(),
            vec!["create v_1", "migrate v_1 migrations/1_blog.sql", "drop v_1"]
        );
    }

    #[tokio::test]
    async fn test_create_failure_still_attempts_drop() {
        let tools = FakeTools {
            fail_on: Some("create".into()),
            ..Default::default()
        };
        let runner = ValidationRunner::new(tools, "v", Interrupt::never());
        let outcome = runner.validate_in("v_1", &plan()).await;

        assert_eq!(outcome.failure.unwrap().step, Step::CreateDatabase);
        assert_eq!(runner.tools().calls(), vec!["create v_1", "drop v_1"]);
    }

    #[tokio::test]
    async fn test_drop_failure_fails_an_otherwise_good_run() {
        let tools = FakeTools {
            fail_on: Some("drop".into()),
            ..Default::default()
        };
        let runner = ValidationRunner::new(tools, "v", Interrupt::never());
        let outcome = runner.validate_in("v_1", &plan()).await;

        assert!(!outcome.is_success());
        assert_eq!(outcome.failure.unwrap().step, Step::DropDatabase);
    }

    #[tokio::test]
    async fn test_new_migration_is_applied_twice_before_seed() {
        let runner = ValidationRunner::new(FakeTools::default(), "v", Interrupt::never());
        let plan = plan().rerunning("migrations/1_blog.sql");
        let outcome = runner.validate_in("v_1", &plan).await;

        assert!(outcome.is_success());
        assert_eq!(
            runner.tools().calls(),
            vec![
                "create v_1",
                "migrate v_1 migrations/1_blog.sql",
                "migrate v_1 migrations/1_blog.sql",
                "seed v_1 seeds/1_blog.sql",
                "drop v_1",
            ]
        );
    }

    #[tokio::test]
    async fn test_non_idempotent_migration_fails_on_second_apply() {
        let tools = FakeTools {
            fail_on_repeat: true,
            ..Default::default()
        };
        let runner = ValidationRunner::new(tools, "v", Interrupt::never());
        let plan = plan().rerunning("migrations/1_blog.sql");
        let outcome = runner.validate_in("v_1", &plan).await;

        let failure = outcome.failure.clone().unwrap();
        assert_eq!(failure.step, Step::ApplyMigration);
        assert_eq!(failure.file, Some(PathBuf::from("migrations/1_blog.sql")));
        assert!(failure.output.starts_with("the migration is not idempotent"));
        assert!(failure.output.contains("exploded"));
        assert_eq!(
            runner.tools().calls(),
            vec![
                "create v_1",
                "migrate v_1 migrations/1_blog.sql",
                "migrate v_1 migrations/1_blog.sql",
                "drop v_1",
            ]
        );
    }

    #[tokio::test]
    async fn test_interrupt_mid_seed_still_drops() {
        let tools = FakeTools {
            hang_on: Some("seed".into()),
            ..Default::default()
        };
        let (handle, interrupt) = Interrupt::new();
        let runner = ValidationRunner::new(tools, "v", interrupt);

        let plan = plan();
        let validating = runner.validate_in("v_1", &plan);
        let trigger = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.trigger();
        };
        let (outcome, _) = tokio::join!(validating, trigger);

        assert!(outcome.interrupted);
        assert!(!outcome.is_success());
        assert_eq!(runner.tools().calls().last().unwrap(), "drop v_1");
    }

    #[test]
    fn test_failure_display_includes_raw_output() {
        let failure = ValidationFailure::new(
            Step::ApplySeed,
            Some(PathBuf::from("seeds/2_x.sql")),
            Some(3),
            "ERROR:  insert or update on table \"comments\" violates foreign key constraint",
        );
        assert_eq!(
            failure.to_string(),
            "apply seed failed on seeds/2_x.sql (exit code 3):\nERROR:  insert or update on table \"comments\" violates foreign key constraint"
        );
    }
}
