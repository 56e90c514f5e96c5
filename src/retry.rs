//! The generate → validate → correct loop.
//!
//! A bounded state machine: every failed validation goes back through the
//! agent with the failure text folded into the next instruction, until the
//! attempt budget is spent. There is no local SQL patching.

use tokio::sync::mpsc;

use crate::agent::{Agent, RunStats};
use crate::error::{IdeaError, IdeaResult};
use crate::interrupt::Interrupt;
use crate::present::{self, Presenter};
use crate::project::{ArtifactPair, ProjectState};
use crate::prompt::{self, Correction, GenerationRequest, Instruction};
use crate::validate::{
    DatabaseTools, Step, ValidationFailure, ValidationOutcome, ValidationPlan, ValidationRunner,
};

/// Where the controller is.
#[derive(Debug)]
enum Phase {
    Composing,
    Generating(Instruction),
    Validating,
    Retrying(ValidationFailure),
}

/// A successful run.
#[derive(Debug)]
pub struct RunReport {
    pub attempts: u32,
    pub artifacts: ArtifactPair,
    pub outcome: ValidationOutcome,
    pub stats: Vec<RunStats>,
}

/// Sequences generation attempts and validation.
pub struct RetryController<A, T> {
    agent: A,
    runner: ValidationRunner<T>,
    system_prompt: String,
    max_attempts: u32,
    interrupt: Interrupt,
}

impl<A: Agent, T: DatabaseTools> RetryController<A, T> {
    pub fn new(
        agent: A,
        runner: ValidationRunner<T>,
        system_prompt: impl Into<String>,
        max_attempts: u32,
        interrupt: Interrupt,
    ) -> Self {
        Self {
            agent,
            runner,
            system_prompt: system_prompt.into(),
            max_attempts: max_attempts.max(1),
            interrupt,
        }
    }

    pub fn agent(&self) -> &A {
        &self.agent
    }

    pub fn runner(&self) -> &ValidationRunner<T> {
        &self.runner
    }

    /// Run until the files validate, the budget runs out, or a fatal error.
    ///
    /// On any error the files written during the run are removed again, so
    /// only a validated pair is ever left in the project.
    pub async fn run<P: Presenter>(
        &self,
        request: &GenerationRequest,
        presenter: P,
    ) -> IdeaResult<RunReport> {
        let result = self.attempts(request, presenter).await;
        if result.is_err() {
            match request.state.discard_new_files() {
                Ok(removed) if !removed.is_empty() => {
                    tracing::info!(files = removed.len(), "discarded unvalidated files")
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "could not remove unvalidated files"),
            }
        }
        result
    }

    async fn attempts<P: Presenter>(
        &self,
        request: &GenerationRequest,
        mut presenter: P,
    ) -> IdeaResult<RunReport> {
        let mut attempt = 0u32;
        let mut correction: Option<Correction> = None;
        let mut stats = Vec::new();
        let mut phase = Phase::Composing;

        loop {
            phase = match phase {
                Phase::Composing => {
                    attempt += 1;
                    tracing::info!(attempt, max = self.max_attempts, "composing instruction");
                    Phase::Generating(prompt::compose(
                        request,
                        &self.system_prompt,
                        attempt,
                        correction.as_ref(),
                    ))
                }

                Phase::Generating(instruction) => {
                    presenter.on_attempt(attempt, self.max_attempts);
                    let (run, returned) = self.generate(&instruction, presenter).await;
                    presenter = returned?;
                    stats.push(run?);
                    Phase::Validating
                }

                Phase::Validating => {
                    let after = ProjectState::scan(&request.state.root)?;
                    let (outcome, artifacts) = match request.state.new_artifacts(&after) {
                        Ok(pair) => {
                            let plan = ValidationPlan::new(after.apply_order())
                                .rerunning(pair.migration.path.clone());
                            (self.runner.validate(&plan).await, Some(pair))
                        }
                        Err(reason) => (ValidationOutcome::artifact_failure(reason), None),
                    };
                    presenter.on_validation(&outcome);
                    if outcome.interrupted {
                        return Err(IdeaError::Interrupted);
                    }

                    match (outcome.failure.clone(), artifacts) {
                        (None, Some(artifacts)) => {
                            tracing::info!(attempt, database = %outcome.database, "validation passed");
                            return Ok(RunReport {
                                attempts: attempt,
                                artifacts,
                                outcome,
                                stats,
                            });
                        }
                        (failure, artifacts) => {
                            let failure = failure.unwrap_or_else(|| {
                                ValidationFailure::new(Step::Artifacts, None, None, "no files were produced")
                            });
                            correction = Some(Correction {
                                failure: failure.clone(),
                                migration_file: artifacts
                                    .as_ref()
                                    .map(|a| a.migration.file_name.clone()),
                                seed_file: artifacts.as_ref().map(|a| a.seed.file_name.clone()),
                            });
                            Phase::Retrying(failure)
                        }
                    }
                }

                Phase::Retrying(failure) => {
                    if attempt >= self.max_attempts {
                        tracing::warn!(attempt, step = %failure.step, "attempt budget exhausted");
                        return Err(IdeaError::RetryExhausted {
                            attempts: attempt,
                            last: failure,
                        });
                    }
                    tracing::info!(attempt, step = %failure.step, "validation failed, retrying");
                    Phase::Composing
                }
            };
        }
    }

    /// One agent run with its own presenter task. Always returns the presenter.
    async fn generate<P: Presenter>(
        &self,
        instruction: &Instruction,
        presenter: P,
    ) -> (IdeaResult<RunStats>, IdeaResult<P>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let presenting = tokio::spawn(present::drive(presenter, rx));

        let mut interrupt = self.interrupt.clone();
        // The sender moves into the agent call; when that future finishes or
        // is dropped, the presenter sees the end of the stream.
        let run = tokio::select! {
            biased;
            _ = interrupt.wait() => Err(IdeaError::Interrupted),
            run = self.agent.generate(instruction, tx) => run,
        };

        let presenter = presenting
            .await
            .map_err(|e| IdeaError::Presenter(e.to_string()));
        (run, presenter)
    }
}
