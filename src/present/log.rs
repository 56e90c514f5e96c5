//! Non-interactive presenter: every event becomes a `tracing` record.
//!
//! Used for CI and piped output, where redrawing a terminal makes no sense.

use super::{Presenter, format_secs};
use crate::agent::ProgressEvent;
use crate::validate::ValidationOutcome;

/// Presenter that logs instead of drawing.
#[derive(Debug, Default)]
pub struct LogPresenter {
    /// Also print the final report to stdout.
    print_report: bool,
}

impl LogPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn printing_report() -> Self {
        Self { print_report: true }
    }
}

impl Presenter for LogPresenter {
    fn on_event(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::TaskAdded { label } => tracing::info!(task = %label, "task added"),
            ProgressEvent::TaskStarted { label } => tracing::info!(task = %label, "task started"),
            ProgressEvent::TaskCompleted { label, elapsed } => {
                tracing::info!(task = %label, elapsed = %format_secs(*elapsed), "task completed")
            }
            ProgressEvent::TaskRemoved { label } => tracing::debug!(task = %label, "task removed"),
            ProgressEvent::Message { preview } => tracing::debug!(%preview, "agent message"),
            ProgressEvent::FinalReport { markdown, stats } => {
                tracing::info!(
                    turns = stats.turns,
                    duration = %format_secs(stats.duration),
                    cost_usd = stats.cost_usd,
                    "agent report received"
                );
                if self.print_report {
                    println!("{}", markdown);
                }
            }
        }
    }

    fn on_attempt(&mut self, attempt: u32, max_attempts: u32) {
        tracing::info!(attempt, max_attempts, "generation attempt");
    }

    fn on_validation(&mut self, outcome: &ValidationOutcome) {
        match &outcome.failure {
            None => tracing::info!(database = %outcome.database, "validation passed"),
            Some(failure) => tracing::warn!(
                database = %outcome.database,
                step = %failure.step,
                exit_code = failure.exit_code,
                output = %failure.output,
                "validation failed"
            ),
        }
    }
}
