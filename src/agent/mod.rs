//! Generative agent port.
//!
//! An [`Agent`] writes the migration and seed files into the project and
//! streams [`ProgressEvent`]s while it works. The stream is finite, ordered
//! and ends with exactly one [`ProgressEvent::FinalReport`].

mod claude;
mod stream;
mod todos;

pub use claude::ClaudeAgent;
pub use stream::{ContentBlock, ResultMessage, StreamMessage, Todo, TodoStatus};
pub use todos::TodoTracker;

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::IdeaResult;
use crate::prompt::Instruction;

/// Usage numbers reported at the end of an agent run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStats {
    pub duration: Duration,
    pub turns: u32,
    pub cost_usd: Option<f64>,
}

/// One unit of agent progress.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    TaskAdded { label: String },
    TaskStarted { label: String },
    TaskCompleted { label: String, elapsed: Duration },
    /// The agent dropped or replaced this entry of its list.
    TaskRemoved { label: String },
    /// First line of the agent's latest text output.
    Message { preview: String },
    FinalReport { markdown: String, stats: RunStats },
}

/// Longest message preview forwarded to presenters.
pub const PREVIEW_CHARS: usize = 70;

/// First non-empty line of `text`, cut to [`PREVIEW_CHARS`].
pub fn preview(text: &str) -> Option<String> {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty())?;
    Some(line.chars().take(PREVIEW_CHARS).collect())
}

/// Capability that turns an instruction into files on disk.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Run one generation. Events go to `events` in order; the final report
    /// is sent last. Backend failures are returned as `IdeaError::Agent` and
    /// must not be retried here.
    async fn generate(
        &self,
        instruction: &Instruction,
        events: UnboundedSender<ProgressEvent>,
    ) -> IdeaResult<RunStats>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_takes_first_line() {
        assert_eq!(
            preview("\n  I'll start by reading the migrations.\nThen...").as_deref(),
            Some("I'll start by reading the migrations.")
        );
        assert_eq!(preview("   \n"), None);
    }

    #[test]
    fn test_preview_truncates() {
        let long = "x".repeat(200);
        assert_eq!(preview(&long).unwrap().chars().count(), PREVIEW_CHARS);
    }
}
