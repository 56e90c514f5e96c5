//! Live terminal view: redraws a task list in place four times a second.

use colored::*;
use std::io::Write;
use std::time::Instant;

use super::{Presenter, TaskBoard, TaskState, format_secs, markdown};
use crate::agent::{ProgressEvent, RunStats};
use crate::validate::ValidationOutcome;

const SPINNER: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Interactive presenter for a terminal on stdout.
pub struct LivePresenter {
    board: TaskBoard,
    started: Instant,
    frame: usize,
    drawn_lines: usize,
    /// Live view closed for this attempt.
    closed: bool,
    report: Option<(String, RunStats)>,
}

impl LivePresenter {
    pub fn new() -> Self {
        Self {
            board: TaskBoard::default(),
            started: Instant::now(),
            frame: 0,
            drawn_lines: 0,
            closed: false,
            report: None,
        }
    }

    /// Lines of one frame, without cursor control.
    fn frame_lines(&self, spinner: &str) -> Vec<String> {
        let now = Instant::now();
        let message = self
            .board
            .message
            .as_deref()
            .unwrap_or("Waiting for response...");

        let mut lines = vec![
            format!(
                "{} {}",
                format!("Agent Execution ({}) -", format_secs(now - self.started)).bold(),
                message.dimmed()
            ),
            String::new(),
        ];

        if self.board.tasks.is_empty() {
            lines.push(format!("{} Starting agent...", spinner).cyan().to_string());
            return lines;
        }

        for (label, state) in &self.board.tasks {
            let line = match state {
                TaskState::Done { elapsed } => format!(
                    "{} {} {}",
                    "[✓]".green().bold(),
                    label,
                    format!("({})", format_secs(*elapsed)).dimmed()
                ),
                TaskState::Running { since } => format!(
                    "{} {} {}",
                    format!("[{}]", spinner).cyan().bold(),
                    label,
                    format!("({})", format_secs(now.saturating_duration_since(*since))).dimmed()
                ),
                TaskState::Pending => format!("{} {}", "[ ]".dimmed(), label),
            };
            lines.push(line);
        }
        lines
    }

    fn draw(&mut self, spinner: &str) {
        let lines = self.frame_lines(spinner);
        let mut stdout = std::io::stdout().lock();
        if self.drawn_lines > 0 {
            // Move to the top of the previous frame and clear it.
            let _ = write!(stdout, "\x1b[{}A\x1b[J", self.drawn_lines);
        }
        for line in &lines {
            let _ = writeln!(stdout, "{}", line);
        }
        let _ = stdout.flush();
        self.drawn_lines = lines.len();
    }

    fn close_view(&mut self) {
        if self.closed {
            return;
        }
        self.draw("✓");
        self.closed = true;

        if let Some((markdown, stats)) = self.report.take() {
            println!();
            if markdown.trim().is_empty() {
                println!("{}", "Success!".green().bold());
            } else {
                println!("{}", markdown::render(&markdown));
            }
            println!();
            println!("{}", stats_line(&stats).dimmed());
        }
    }
}

impl Default for LivePresenter {
    fn default() -> Self {
        Self::new()
    }
}

impl Presenter for LivePresenter {
    fn on_event(&mut self, event: &ProgressEvent) {
        if self.closed {
            return;
        }
        if let ProgressEvent::FinalReport { markdown, stats } = event {
            self.report = Some((markdown.clone(), stats.clone()));
            self.close_view();
            return;
        }
        self.board.apply(event, Instant::now());
        self.draw(SPINNER[self.frame % SPINNER.len()]);
    }

    fn on_tick(&mut self) {
        if self.closed {
            return;
        }
        self.frame += 1;
        self.draw(SPINNER[self.frame % SPINNER.len()]);
    }

    fn on_close(&mut self) {
        self.close_view();
    }

    fn on_attempt(&mut self, attempt: u32, max_attempts: u32) {
        self.board.clear();
        self.started = Instant::now();
        self.drawn_lines = 0;
        self.closed = false;
        self.report = None;
        println!();
        if attempt == 1 {
            println!("{}", "🛠  Generating migration and seed".cyan().bold());
        } else {
            println!(
                "{}",
                format!("🔁 Fixing errors (attempt {}/{})", attempt, max_attempts)
                    .yellow()
                    .bold()
            );
        }
        println!();
    }

    fn on_validation(&mut self, outcome: &ValidationOutcome) {
        println!();
        if outcome.database.is_empty() {
            println!("{}", "Checking generated files".cyan());
        } else {
            println!("{} {}", "Validating against".cyan(), outcome.database.yellow());
        }
        for step in &outcome.steps {
            let what = match &step.file {
                Some(file) => format!("{} {}", step.step, file.display()),
                None => step.step.to_string(),
            };
            let mark = if step.success { "✓".green() } else { "✗".red() };
            println!("  {} {} {}", mark, what, format!("({})", format_secs(step.elapsed)).dimmed());
        }
        match &outcome.failure {
            None if outcome.is_success() => println!("  {}", "✓ Validation passed".green().bold()),
            None => {}
            Some(failure) => {
                println!("  {} {}", "✗".red(), failure.to_string().lines().next().unwrap_or("").red());
                println!("{}", "━".repeat(50).dimmed());
                println!("{}", failure.output);
                println!("{}", "━".repeat(50).dimmed());
            }
        }
    }
}

/// `Duration: 41.2s | Turns: 12 | Cost: $0.1834`
pub fn stats_line(stats: &RunStats) -> String {
    let mut line = format!(
        "Duration: {} | Turns: {}",
        format_secs(stats.duration),
        stats.turns
    );
    if let Some(cost) = stats.cost_usd {
        line.push_str(&format!(" | Cost: ${:.4}", cost));
    }
    line
}
