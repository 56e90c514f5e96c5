//! Turns successive todo-list snapshots into task events.
//!
//! The agent rewrites its whole todo list on every update. Tasks are keyed
//! by position, like the agent's own list.

use std::time::{Duration, Instant};

use super::ProgressEvent;
use super::stream::{Todo, TodoStatus};

#[derive(Debug, Clone)]
struct Tracked {
    label: String,
    started: Option<Instant>,
    completed: bool,
}

/// Diffs todo snapshots into ordered [`ProgressEvent`]s.
#[derive(Debug, Clone)]
pub struct TodoTracker {
    origin: Instant,
    tasks: Vec<Tracked>,
}

impl TodoTracker {
    pub fn new(origin: Instant) -> Self {
        Self {
            origin,
            tasks: Vec::new(),
        }
    }

    /// Events implied by a new snapshot taken at `now`.
    pub fn update(&mut self, todos: &[Todo], now: Instant) -> Vec<ProgressEvent> {
        let mut events = Vec::new();

        for (i, todo) in todos.iter().enumerate() {
            let replaced = self.tasks.get(i).is_some_and(|t| t.label != todo.content);
            if i >= self.tasks.len() || replaced {
                let tracked = Tracked {
                    label: todo.content.clone(),
                    started: None,
                    completed: false,
                };
                if replaced {
                    events.push(ProgressEvent::TaskRemoved {
                        label: self.tasks[i].label.clone(),
                    });
                    self.tasks[i] = tracked;
                } else {
                    self.tasks.push(tracked);
                }
                events.push(ProgressEvent::TaskAdded {
                    label: todo.content.clone(),
                });
            }

            let task = &mut self.tasks[i];
            match todo.status {
                TodoStatus::Pending => {}
                TodoStatus::InProgress => {
                    if task.started.is_none() {
                        task.started = Some(now);
                        events.push(ProgressEvent::TaskStarted {
                            label: task.label.clone(),
                        });
                    }
                }
                TodoStatus::Completed => {
                    if task.completed {
                        continue;
                    }
                    // Never seen in progress: time it from the start of the run.
                    let started = match task.started {
                        Some(started) => started,
                        None => {
                            task.started = Some(self.origin);
                            events.push(ProgressEvent::TaskStarted {
                                label: task.label.clone(),
                            });
                            self.origin
                        }
                    };
                    task.completed = true;
                    events.push(ProgressEvent::TaskCompleted {
                        label: task.label.clone(),
                        elapsed: now.saturating_duration_since(started),
                    });
                }
            }
        }

        if self.tasks.len() > todos.len() {
            for gone in self.tasks.drain(todos.len()..) {
                events.push(ProgressEvent::TaskRemoved { label: gone.label });
            }
        }

        events
    }

    /// Elapsed time of the run so far.
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn todo(content: &str, status: TodoStatus) -> Todo {
        Todo {
            content: content.to_string(),
            status,
        }
    }

    fn added(label: &str) -> ProgressEvent {
        ProgressEvent::TaskAdded {
            label: label.into(),
        }
    }

    fn removed(label: &str) -> ProgressEvent {
        ProgressEvent::TaskRemoved {
            label: label.into(),
        }
    }

    fn started(label: &str) -> ProgressEvent {
        ProgressEvent::TaskStarted {
            label: label.into(),
        }
    }

    #[test]
    fn test_first_snapshot_adds_tasks_in_order() {
        let t0 = Instant::now();
        let mut tracker = TodoTracker::new(t0);
        let events = tracker.update(
            &[
                todo("Inspect migrations", TodoStatus::InProgress),
                todo("Write migration", TodoStatus::Pending),
            ],
            t0,
        );
        assert_eq!(
            events,
            vec![
                added("Inspect migrations"),
                started("Inspect migrations"),
                added("Write migration"),
            ]
        );
    }

    #[test]
    fn test_completion_reports_elapsed_once() {
        let t0 = Instant::now();
        let mut tracker = TodoTracker::new(t0);
        tracker.update(&[todo("Write seed", TodoStatus::InProgress)], t0 + Duration::from_secs(1));

        let done = [todo("Write seed", TodoStatus::Completed)];
        let events = tracker.update(&done, t0 + Duration::from_secs(4));
        assert_eq!(
            events,
            vec![ProgressEvent::TaskCompleted {
                label: "Write seed".into(),
                elapsed: Duration::from_secs(3),
            }]
        );
        assert!(tracker.update(&done, t0 + Duration::from_secs(9)).is_empty());
    }

    #[test]
    fn test_completed_without_start_is_timed_from_origin() {
        let t0 = Instant::now();
        let mut tracker = TodoTracker::new(t0);
        let events = tracker.update(
            &[todo("Inspect", TodoStatus::Completed)],
            t0 + Duration::from_secs(2),
        );
        assert_eq!(
            events,
            vec![
                added("Inspect"),
                started("Inspect"),
                ProgressEvent::TaskCompleted {
                    label: "Inspect".into(),
                    elapsed: Duration::from_secs(2),
                },
            ]
        );
    }

    #[test]
    fn test_replaced_label_is_a_new_task() {
        let t0 = Instant::now();
        let mut tracker = TodoTracker::new(t0);
        tracker.update(&[todo("Draft", TodoStatus::InProgress)], t0);
        let events = tracker.update(&[todo("Write migration", TodoStatus::InProgress)], t0);
        assert_eq!(
            events,
            vec![
                removed("Draft"),
                added("Write migration"),
                started("Write migration")
            ]
        );
    }

    #[test]
    fn test_shorter_list_removes_trailing_tasks() {
        let t0 = Instant::now();
        let mut tracker = TodoTracker::new(t0);
        tracker.update(
            &[
                todo("Inspect", TodoStatus::Completed),
                todo("Write migration", TodoStatus::InProgress),
                todo("Write seed", TodoStatus::Pending),
            ],
            t0,
        );
        let events = tracker.update(&[todo("Inspect", TodoStatus::Completed)], t0);
        assert_eq!(events, vec![removed("Write migration"), removed("Write seed")]);

        // A task that comes back is new again.
        let events = tracker.update(
            &[
                todo("Inspect", TodoStatus::Completed),
                todo("Write seed", TodoStatus::Pending),
            ],
            t0,
        );
        assert_eq!(events, vec![added("Write seed")]);
    }

    #[test]
    fn test_elapsed() {
        let t0 = Instant::now();
        let tracker = TodoTracker::new(t0);
        assert_eq!(tracker.elapsed(t0 + Duration::from_millis(1500)), Duration::from_millis(1500));
    }
}
