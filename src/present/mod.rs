//! Progress presentation.
//!
//! Presenters are pure sinks: they consume [`ProgressEvent`]s in arrival
//! order from an unbounded channel, so rendering never slows the agent down.

mod live;
mod log;
pub mod markdown;

pub use live::LivePresenter;
pub use log::LogPresenter;

use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::agent::ProgressEvent;
use crate::validate::ValidationOutcome;

/// Redraw interval for live views.
pub const TICK: Duration = Duration::from_millis(250);

/// Event sink for one run.
pub trait Presenter: Send + 'static {
    fn on_event(&mut self, event: &ProgressEvent);

    /// Called every [`TICK`] while events are awaited.
    fn on_tick(&mut self) {}

    /// The event stream of an attempt has ended.
    fn on_close(&mut self) {}

    fn on_attempt(&mut self, _attempt: u32, _max_attempts: u32) {}

    fn on_validation(&mut self, _outcome: &ValidationOutcome) {}
}

/// Feed every event from `events` to `presenter`, then hand it back.
pub async fn drive<P: Presenter>(mut presenter: P, mut events: UnboundedReceiver<ProgressEvent>) -> P {
    let mut ticker = tokio::time::interval(TICK);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => presenter.on_event(&event),
                None => break,
            },
            _ = ticker.tick() => presenter.on_tick(),
        }
    }
    presenter.on_close();
    presenter
}

/// Task state as shown to the user.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskState {
    Pending,
    Running { since: Instant },
    Done { elapsed: Duration },
}

/// Ordered task list rebuilt from events.
#[derive(Debug, Clone, Default)]
pub struct TaskBoard {
    pub tasks: Vec<(String, TaskState)>,
    pub message: Option<String>,
}

impl TaskBoard {
    pub fn apply(&mut self, event: &ProgressEvent, now: Instant) {
        match event {
            ProgressEvent::TaskAdded { label } => {
                if !self.tasks.iter().any(|(l, _)| l == label) {
                    self.tasks.push((label.clone(), TaskState::Pending));
                }
            }
            ProgressEvent::TaskStarted { label } => {
                self.set(label, TaskState::Running { since: now });
            }
            ProgressEvent::TaskCompleted { label, elapsed } => {
                self.set(label, TaskState::Done { elapsed: *elapsed });
            }
            ProgressEvent::TaskRemoved { label } => {
                if let Some(pos) = self.tasks.iter().position(|(l, _)| l == label) {
                    self.tasks.remove(pos);
                }
            }
            ProgressEvent::Message { preview } => self.message = Some(preview.clone()),
            ProgressEvent::FinalReport { .. } => {}
        }
    }

    fn set(&mut self, label: &str, state: TaskState) {
        match self.tasks.iter_mut().find(|(l, _)| l == label) {
            Some((_, current)) => *current = state,
            None => self.tasks.push((label.to_string(), state)),
        }
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
        self.message = None;
    }
}

/// `12.3s`
pub fn format_secs(duration: Duration) -> String {
    format!("{:.1}s", duration.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recording(Arc<Mutex<Vec<String>>>);

    impl Presenter for Recording {
        fn on_event(&mut self, event: &ProgressEvent) {
            let label = match event {
                ProgressEvent::TaskAdded { label } => format!("added {}", label),
                ProgressEvent::TaskStarted { label } => format!("started {}", label),
                ProgressEvent::TaskCompleted { label, .. } => format!("completed {}", label),
                ProgressEvent::TaskRemoved { label } => format!("removed {}", label),
                ProgressEvent::Message { preview } => format!("message {}", preview),
                ProgressEvent::FinalReport { .. } => "report".to_string(),
            };
            self.0.lock().unwrap().push(label);
        }

        fn on_close(&mut self) {
            self.0.lock().unwrap().push("closed".into());
        }
    }

    #[tokio::test]
    async fn test_drive_preserves_order_and_closes() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let recording = Recording::default();
        let log = recording.0.clone();
        let handle = tokio::spawn(drive(recording, rx));

        for event in [
            ProgressEvent::TaskAdded { label: "a".into() },
            ProgressEvent::TaskAdded { label: "b".into() },
            ProgressEvent::TaskStarted { label: "b".into() },
            ProgressEvent::TaskCompleted {
                label: "b".into(),
                elapsed: Duration::from_secs(1),
            },
            ProgressEvent::FinalReport {
                markdown: "done".into(),
                stats: Default::default(),
            },
        ] {
            tx.send(event).unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["added a", "added b", "started b", "completed b", "report", "closed"]
        );
    }

    #[test]
    fn test_task_board_tracks_states() {
        let now = Instant::now();
        let mut board = TaskBoard::default();
        board.apply(&ProgressEvent::TaskAdded { label: "a".into() }, now);
        board.apply(&ProgressEvent::TaskAdded { label: "a".into() }, now);
        board.apply(&ProgressEvent::TaskStarted { label: "a".into() }, now);
        assert_eq!(board.tasks, vec![("a".to_string(), TaskState::Running { since: now })]);

        board.apply(
            &ProgressEvent::TaskCompleted {
                label: "a".into(),
                elapsed: Duration::from_millis(2500),
            },
            now,
        );
        assert_eq!(
            board.tasks[0].1,
            TaskState::Done {
                elapsed: Duration::from_millis(2500)
            }
        );
        board.apply(&ProgressEvent::Message { preview: "hi".into() }, now);
        assert_eq!(board.message.as_deref(), Some("hi"));
    }

    #[test]
    fn test_removed_task_leaves_the_board() {
        let now = Instant::now();
        let mut board = TaskBoard::default();
        board.apply(&ProgressEvent::TaskAdded { label: "Draft".into() }, now);
        board.apply(&ProgressEvent::TaskStarted { label: "Draft".into() }, now);
        board.apply(&ProgressEvent::TaskAdded { label: "Write seed".into() }, now);
        board.apply(&ProgressEvent::TaskRemoved { label: "Draft".into() }, now);

        assert_eq!(board.tasks, vec![("Write seed".to_string(), TaskState::Pending)]);
        // Unknown labels are ignored.
        board.apply(&ProgressEvent::TaskRemoved { label: "Other".into() }, now);
        assert_eq!(board.tasks.len(), 1);
    }

    #[test]
    fn test_format_secs() {
        assert_eq!(format_secs(Duration::from_millis(12340)), "12.3s");
    }
}
