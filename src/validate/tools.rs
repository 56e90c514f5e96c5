//! External PostgreSQL client tools.
//!
//! `DatabaseTools` is the port the validation runner talks to; `PgCliTools`
//! shells out to `createdb`, `psql` and `dropdb`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

use crate::config::DatabaseConfig;
use crate::error::{IdeaError, IdeaResult};

/// Captured result of one external command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// `None` when the process was killed or never started.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0) && !self.timed_out
    }

    /// Raw error text: stderr, falling back to stdout when stderr is empty.
    pub fn error_text(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            stderr.to_string()
        } else {
            self.stdout.trim().to_string()
        }
    }

    fn failed(message: String, elapsed: Duration) -> Self {
        Self {
            code: None,
            stderr: message,
            elapsed,
            ..Default::default()
        }
    }
}

/// Capability to create, load and drop a database.
#[async_trait]
pub trait DatabaseTools: Send + Sync {
    async fn create_database(&self, name: &str) -> CommandOutput;

    /// Apply a migration file (or every `.sql` file in a directory, in order).
    async fn apply_migration(&self, database: &str, path: &Path) -> CommandOutput;

    async fn run_sql_file(&self, database: &str, file: &Path) -> CommandOutput;

    async fn drop_database(&self, name: &str) -> CommandOutput;
}

/// Production adapter over the PostgreSQL command-line client tools.
#[derive(Debug, Clone)]
pub struct PgCliTools {
    createdb: String,
    psql: String,
    dropdb: String,
    env: Vec<(String, String)>,
    timeout: Duration,
}

impl PgCliTools {
    pub fn new(config: &DatabaseConfig) -> Self {
        let mut env = Vec::new();
        if let Some(host) = &config.host {
            env.push(("PGHOST".to_string(), host.clone()));
        }
        if let Some(port) = config.port {
            env.push(("PGPORT".to_string(), port.to_string()));
        }
        if let Some(user) = &config.user {
            env.push(("PGUSER".to_string(), user.clone()));
        }
        Self {
            createdb: config.createdb.clone(),
            psql: config.psql.clone(),
            dropdb: config.dropdb.clone(),
            env,
            timeout: Duration::from_secs(config.command_timeout_secs),
        }
    }

    /// Programs that must be on PATH for validation to work.
    pub fn programs(&self) -> [&str; 3] {
        [
            self.createdb.as_str(),
            self.psql.as_str(),
            self.dropdb.as_str(),
        ]
    }

    async fn run(&self, program: &str, args: &[&str]) -> CommandOutput {
        let started = Instant::now();
        tracing::debug!(program, ?args, "running");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return CommandOutput::failed(
                    format!("failed to start {}: {}", program, e),
                    started.elapsed(),
                );
            }
        };

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => CommandOutput {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                elapsed: started.elapsed(),
                timed_out: false,
            },
            Ok(Err(e)) => CommandOutput::failed(
                format!("{} did not finish: {}", program, e),
                started.elapsed(),
            ),
            // The child future is dropped here, which kills the process.
            Err(_) => CommandOutput {
                timed_out: true,
                ..CommandOutput::failed(
                    format!("{} timed out after {}s", program, self.timeout.as_secs()),
                    started.elapsed(),
                )
            },
        }
    }

    async fn psql_file(&self, database: &str, file: &Path) -> CommandOutput {
        let file = file.to_string_lossy();
        self.run(
            &self.psql,
            &["-X", "-q", "-v", "ON_ERROR_STOP=1", "-d", database, "-f", &*file],
        )
        .await
    }
}

#[async_trait]
impl DatabaseTools for PgCliTools {
    async fn create_database(&self, name: &str) -> CommandOutput {
        self.run(&self.createdb, &[name]).await
    }

    async fn apply_migration(&self, database: &str, path: &Path) -> CommandOutput {
        if !path.is_dir() {
            return self.psql_file(database, path).await;
        }

        let mut files: Vec<PathBuf> = match std::fs::read_dir(path) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "sql"))
                .collect(),
            Err(e) => {
                return CommandOutput::failed(
                    format!("cannot read {}: {}", path.display(), e),
                    Duration::ZERO,
                );
            }
        };
        files.sort();

        let mut combined = CommandOutput {
            code: Some(0),
            ..Default::default()
        };
        for file in files {
            let output = self.psql_file(database, &file).await;
            combined.elapsed += output.elapsed;
            combined.stdout.push_str(&output.stdout);
            if !output.success() {
                return CommandOutput {
                    elapsed: combined.elapsed,
                    stdout: combined.stdout,
                    ..output
                };
            }
        }
        combined
    }

    async fn run_sql_file(&self, database: &str, file: &Path) -> CommandOutput {
        self.psql_file(database, file).await
    }

    async fn drop_database(&self, name: &str) -> CommandOutput {
        self.run(&self.dropdb, &["--if-exists", name]).await
    }
}

/// Find `program` on PATH (or accept it as a path to an existing file).
pub fn find_on_path(program: &str) -> Option<PathBuf> {
    let direct = Path::new(program);
    if direct.components().count() > 1 {
        return direct.is_file().then(|| direct.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// Startup check: every program must be resolvable.
pub fn ensure_on_path<'a>(programs: impl IntoIterator<Item = &'a str>) -> IdeaResult<()> {
    for program in programs {
        match find_on_path(program) {
            Some(found) => tracing::debug!(program, path = %found.display(), "found tool"),
            None => return Err(IdeaError::MissingTool(program.to_string())),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_output_success() {
        let ok = CommandOutput {
            code: Some(0),
            ..Default::default()
        };
        assert!(ok.success());

        let timed_out = CommandOutput {
            code: Some(0),
            timed_out: true,
            ..Default::default()
        };
        assert!(!timed_out.success());
        assert!(!CommandOutput::default().success());
    }

    #[test]
    fn test_error_text_prefers_stderr() {
        let output = CommandOutput {
            code: Some(3),
            stdout: "psql:seed.sql:4: NOTICE".into(),
            stderr: "ERROR:  relation \"users\" does not exist\n".into(),
            ..Default::default()
        };
        assert_eq!(output.error_text(), "ERROR:  relation \"users\" does not exist");

        let only_stdout = CommandOutput {
            code: Some(1),
            stdout: "something broke".into(),
            ..Default::default()
        };
        assert_eq!(only_stdout.error_text(), "something broke");
    }

    #[test]
    fn test_missing_tool_is_reported() {
        let err = ensure_on_path(["definitely-not-a-real-tool-pgidea"]).unwrap_err();
        assert!(matches!(err, IdeaError::MissingTool(ref p) if p == "definitely-not-a-real-tool-pgidea"));
    }

    #[test]
    fn test_env_from_config() {
        let config = DatabaseConfig {
            host: Some("db.internal".into()),
            port: Some(6543),
            ..Default::default()
        };
        let tools = PgCliTools::new(&config);
        assert!(tools.env.contains(&("PGHOST".to_string(), "db.internal".to_string())));
        assert!(tools.env.contains(&("PGPORT".to_string(), "6543".to_string())));
        assert_eq!(tools.programs(), ["createdb", "psql", "dropdb"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_program_becomes_failed_output() {
        let config = DatabaseConfig {
            createdb: "definitely-not-a-real-tool-pgidea".into(),
            ..Default::default()
        };
        let tools = PgCliTools::new(&config);
        let output = tools.create_database("x").await;
        assert!(!output.success());
        assert!(output.stderr.contains("failed to start"));
    }
}
