//! Configuration file support.
//!
//! Looked up in order: an explicit `--config` path, `<project>/pgidea.toml`,
//! then `<config dir>/pgidea/config.toml`. Missing files mean defaults.
//!
//! ```toml
//! max_attempts = 3
//!
//! [agent]
//! program = "claude"
//! model = "sonnet"
//! timeout_secs = 900
//!
//! [database]
//! name_prefix = "pgidea_validate"
//! command_timeout_secs = 60
//! host = "localhost"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{IdeaError, IdeaResult};

pub const PROJECT_CONFIG_FILE: &str = "pgidea.toml";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Total generation attempts, including the first.
    pub max_attempts: u32,
    pub agent: AgentConfig,
    pub database: DatabaseConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            agent: AgentConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

/// Generative agent settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    pub program: String,
    pub model: Option<String>,
    /// Wall-clock limit for one generation run.
    pub timeout_secs: u64,
    /// Replace the built-in system prompt with this file.
    pub system_prompt: Option<PathBuf>,
    /// Extra arguments appended to the agent command line.
    pub extra_args: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            model: None,
            timeout_secs: 900,
            system_prompt: None,
            extra_args: Vec::new(),
        }
    }
}

/// Disposable database and client tool settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub name_prefix: String,
    /// Wall-clock limit for each createdb/psql/dropdb call.
    pub command_timeout_secs: u64,
    pub createdb: String,
    pub psql: String,
    pub dropdb: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            name_prefix: "pgidea_validate".to_string(),
            command_timeout_secs: 60,
            createdb: "createdb".to_string(),
            psql: "psql".to_string(),
            dropdb: "dropdb".to_string(),
            host: None,
            port: None,
            user: None,
        }
    }
}

impl Config {
    /// Load configuration for a project, falling back to defaults.
    pub fn load(project_root: &Path, explicit: Option<&Path>) -> IdeaResult<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let candidates = [
            Some(project_root.join(PROJECT_CONFIG_FILE)),
            dirs::config_dir().map(|d| d.join("pgidea").join("config.toml")),
        ];
        for path in candidates.into_iter().flatten() {
            if path.is_file() {
                return Self::from_file(&path);
            }
        }

        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> IdeaResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| IdeaError::fs(path, e))?;
        let config = Self::parse(&content)
            .map_err(|e| IdeaError::Config(format!("{}: {}", path.display(), e)))?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn parse(content: &str) -> IdeaResult<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| IdeaError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> IdeaResult<()> {
        if self.max_attempts == 0 {
            return Err(IdeaError::Config("max_attempts must be at least 1".into()));
        }
        if self.agent.timeout_secs == 0 || self.database.command_timeout_secs == 0 {
            return Err(IdeaError::Config("timeouts must be greater than zero".into()));
        }

        // Room for `_YYYYMMDDHHMMSS` inside PostgreSQL's 63-byte identifier limit.
        let prefix = &self.database.name_prefix;
        let valid_prefix = !prefix.is_empty()
            && prefix.len() <= 40
            && prefix.starts_with(|c: char| c.is_ascii_lowercase())
            && prefix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if !valid_prefix {
            return Err(IdeaError::Config(format!(
                "database.name_prefix '{}' must be a lowercase identifier of at most 40 characters",
                prefix
            )));
        }
        Ok(())
    }
}
