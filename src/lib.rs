//! # pgidea
//!
//! Turn a plain-language application idea into a PostgreSQL migration and a
//! matching seed file, generated by a coding agent and proven against a
//! disposable database before the run reports success.
//!
//! ```text
//! idea ─► compose ─► agent writes files ─► createdb / psql / dropdb
//!            ▲                                      │
//!            └──────── failure text ◄───────────────┘
//! ```
//!
//! The agent and the database client tools sit behind traits
//! ([`agent::Agent`], [`validate::DatabaseTools`]) so the retry loop can be
//! driven by fakes in tests.

pub mod agent;
pub mod config;
pub mod error;
pub mod interrupt;
pub mod present;
pub mod project;
pub mod prompt;
pub mod retry;
pub mod validate;

pub use config::Config;
pub use error::{IdeaError, IdeaResult};
pub use project::ProjectState;
pub use prompt::GenerationRequest;
pub use retry::{RetryController, RunReport};
