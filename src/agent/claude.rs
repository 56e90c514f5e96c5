//! Production adapter: the `claude` command-line agent in stream-json mode.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;

use super::stream::{ContentBlock, ResultMessage, StreamMessage};
use super::{Agent, ProgressEvent, RunStats, TodoTracker, preview};
use crate::config::AgentConfig;
use crate::error::{IdeaError, IdeaResult};
use crate::prompt::Instruction;

/// Runs the agent CLI as a child process in the project directory.
///
/// File writes and command execution are pre-approved with
/// `--permission-mode bypassPermissions`; the run must never stop to ask.
#[derive(Debug, Clone)]
pub struct ClaudeAgent {
    program: String,
    model: Option<String>,
    extra_args: Vec<String>,
    project_root: PathBuf,
    timeout: Duration,
}

impl ClaudeAgent {
    pub fn new(config: &AgentConfig, project_root: impl Into<PathBuf>) -> Self {
        Self {
            program: config.program.clone(),
            model: config.model.clone(),
            extra_args: config.extra_args.clone(),
            project_root: project_root.into(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Command-line arguments; the user prompt goes to stdin.
    pub fn args(&self, instruction: &Instruction) -> Vec<String> {
        let mut args: Vec<String> = [
            "-p",
            "--output-format",
            "stream-json",
            "--verbose",
            "--permission-mode",
            "bypassPermissions",
            "--system-prompt",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push(instruction.system_prompt.clone());
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }

    async fn run(
        &self,
        instruction: &Instruction,
        events: &UnboundedSender<ProgressEvent>,
    ) -> IdeaResult<RunStats> {
        let mut child = Command::new(&self.program)
            .args(self.args(instruction))
            .current_dir(&self.project_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| IdeaError::Agent(format!("failed to start {}: {}", self.program, e)))?;
        tracing::info!(program = %self.program, attempt = instruction.attempt, "agent started");

        if let Some(mut stdin) = child.stdin.take() {
            let prompt = instruction.user_prompt.clone();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                    tracing::debug!(error = %e, "agent closed stdin early");
                }
            });
        }

        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut buf).await;
            }
            buf
        });

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| IdeaError::Agent("agent stdout unavailable".into()))?;
        let mut lines = BufReader::new(stdout).lines();
        let mut tracker = TodoTracker::new(Instant::now());
        let mut result: Option<ResultMessage> = None;

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| IdeaError::Agent(format!("reading agent output: {}", e)))?
        {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match StreamMessage::parse(line) {
                Ok(StreamMessage::Assistant { message }) => {
                    for block in &message.content {
                        forward_block(block, &mut tracker, events);
                    }
                }
                Ok(StreamMessage::Finished(message)) => {
                    result = Some(message);
                    break;
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(error = %e, "skipping unparseable agent output"),
            }
        }

        drop(lines);
        let status = child
            .wait()
            .await
            .map_err(|e| IdeaError::Agent(format!("waiting for agent: {}", e)))?;
        let stderr = stderr_task.await.unwrap_or_default();

        let Some(result) = result else {
            return Err(IdeaError::Agent(format!(
                "no result message received from agent ({}){}",
                status,
                tail(&stderr)
            )));
        };

        if result.is_error {
            return Err(IdeaError::Agent(format!(
                "{}: {}{}",
                result.subtype,
                result.result.as_deref().unwrap_or("agent execution failed"),
                tail(&stderr)
            )));
        }

        let stats = RunStats {
            duration: Duration::from_millis(result.duration_ms),
            turns: result.num_turns,
            cost_usd: result.total_cost_usd,
        };
        tracing::info!(turns = stats.turns, secs = stats.duration.as_secs_f64(), "agent finished");
        let _ = events.send(ProgressEvent::FinalReport {
            markdown: result.result.unwrap_or_default(),
            stats: stats.clone(),
        });
        Ok(stats)
    }
}

#[async_trait]
impl Agent for ClaudeAgent {
    async fn generate(
        &self,
        instruction: &Instruction,
        events: UnboundedSender<ProgressEvent>,
    ) -> IdeaResult<RunStats> {
        // Dropping the run future kills the child.
        match tokio::time::timeout(self.timeout, self.run(instruction, &events)).await {
            Ok(result) => result,
            Err(_) => Err(IdeaError::Agent(format!(
                "no result within {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}

fn forward_block(
    block: &ContentBlock,
    tracker: &mut TodoTracker,
    events: &UnboundedSender<ProgressEvent>,
) {
    if let Some(todos) = block.todos() {
        for event in tracker.update(&todos, Instant::now()) {
            let _ = events.send(event);
        }
    } else if let ContentBlock::Text { text } = block
        && let Some(preview) = preview(text)
    {
        let _ = events.send(ProgressEvent::Message { preview });
    }
}

fn tail(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        return String::new();
    }
    let lines: Vec<&str> = stderr.lines().collect();
    let start = lines.len().saturating_sub(20);
    format!("\n{}", lines[start..].join("\n"))
}
