//! Error types for pgidea.
//!
//! Filesystem, agent and configuration errors abort a run. Validation
//! failures are recoverable and are turned into corrective instructions by
//! the retry controller until the attempt budget runs out.

use std::path::PathBuf;
use thiserror::Error;

use crate::validate::ValidationFailure;

/// The main error type for pgidea.
#[derive(Debug, Error)]
pub enum IdeaError {
    /// Project directory unreadable or unwritable
    #[error("Filesystem error at '{path}': {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The generative backend failed (spawn, auth, quota, network, timeout)
    #[error("Agent error: {0}")]
    Agent(String),

    /// A disposable-database step failed
    #[error("Validation failed: {0}")]
    Validation(ValidationFailure),

    /// The correction budget is spent
    #[error("Gave up after {attempts} attempt(s); last failure: {last}")]
    RetryExhausted {
        attempts: u32,
        last: ValidationFailure,
    },

    /// A required external command is not on PATH
    #[error("Required command '{0}' not found on PATH")]
    MissingTool(String),

    /// Invalid configuration file or flag
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The progress presenter task died
    #[error("Progress presenter failed: {0}")]
    Presenter(String),

    /// Ctrl-C received
    #[error("Interrupted")]
    Interrupted,
}

impl IdeaError {
    /// Wrap an IO error with the path it happened on.
    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IdeaError::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            IdeaError::Validation(_) | IdeaError::RetryExhausted { .. } => 1,
            IdeaError::MissingTool(_) | IdeaError::Config(_) => 2,
            IdeaError::Agent(_) | IdeaError::Presenter(_) => 3,
            IdeaError::Filesystem { .. } => 4,
            IdeaError::Interrupted => 130,
        }
    }

    /// Whether the retry controller may recover from this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, IdeaError::Validation(_))
    }
}

/// Result type for pgidea operations.
pub type IdeaResult<T> = Result<T, IdeaError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::Step;

    #[test]
    fn test_exit_codes() {
        let failure = ValidationFailure::new(Step::ApplySeed, None, Some(3), "boom");
        assert_eq!(IdeaError::Validation(failure.clone()).exit_code(), 1);
        assert_eq!(
            IdeaError::RetryExhausted {
                attempts: 3,
                last: failure
            }
            .exit_code(),
            1
        );
        assert_eq!(IdeaError::MissingTool("psql".into()).exit_code(), 2);
        assert_eq!(IdeaError::Agent("quota".into()).exit_code(), 3);
        assert_eq!(IdeaError::Interrupted.exit_code(), 130);
    }

    #[test]
    fn test_only_validation_is_recoverable() {
        let failure = ValidationFailure::new(Step::CreateDatabase, None, Some(1), "exists");
        assert!(IdeaError::Validation(failure).is_recoverable());
        assert!(!IdeaError::Agent("unauthorized".into()).is_recoverable());
        assert!(
            !IdeaError::fs("/nope", std::io::Error::other("denied")).is_recoverable()
        );
    }

    #[test]
    fn test_retry_exhausted_keeps_error_text() {
        let failure = ValidationFailure::new(
            Step::ApplySeed,
            Some(PathBuf::from("seeds/20260101000000_blog.sql")),
            Some(3),
            "ERROR:  insert or update on table \"posts\" violates foreign key constraint",
        );
        let err = IdeaError::RetryExhausted {
            attempts: 3,
            last: failure,
        };
        let text = err.to_string();
        assert!(text.contains("3 attempt(s)"));
        assert!(text.contains("violates foreign key constraint"));
    }
}
