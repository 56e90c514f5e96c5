//! Ctrl-C propagation.
//!
//! A `watch` channel carries a single "interrupted" flag so every phase of a
//! run can race its work against it and still reach its cleanup code.

use tokio::sync::{mpsc, watch};

/// Receiving side, cheap to clone.
#[derive(Debug, Clone)]
pub struct Interrupt {
    rx: watch::Receiver<bool>,
}

/// Sending side.
#[derive(Debug)]
pub struct InterruptHandle {
    tx: watch::Sender<bool>,
}

impl InterruptHandle {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

impl Interrupt {
    pub fn new() -> (InterruptHandle, Interrupt) {
        let (tx, rx) = watch::channel(false);
        (InterruptHandle { tx }, Interrupt { rx })
    }

    /// An interrupt that never fires.
    pub fn never() -> Interrupt {
        Interrupt::new().1
    }

    /// Fires on the first Ctrl-C received by the process. A second Ctrl-C
    /// exits immediately with code 130, skipping any cleanup still running.
    pub fn on_ctrl_c() -> Interrupt {
        let (handle, interrupt) = Interrupt::new();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if tx.send(()).is_err() {
                    break;
                }
            }
        });
        tokio::spawn(async move {
            if escalate(rx, &handle).await {
                std::process::exit(130);
            }
        });
        interrupt
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once triggered. Pends forever if the sender is gone untriggered.
    pub async fn wait(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Trigger on the first signal. Returns `true` when a second one arrives.
async fn escalate(mut signals: mpsc::UnboundedReceiver<()>, handle: &InterruptHandle) -> bool {
    if signals.recv().await.is_none() {
        return false;
    }
    tracing::warn!("interrupt received, cleaning up (press Ctrl-C again to exit now)");
    handle.trigger();

    if signals.recv().await.is_none() {
        return false;
    }
    tracing::warn!("second interrupt, exiting without cleanup");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_resolves_after_trigger() {
        let (handle, mut interrupt) = Interrupt::new();
        assert!(!interrupt.is_triggered());
        handle.trigger();
        tokio::time::timeout(Duration::from_secs(1), interrupt.wait())
            .await
            .expect("wait should resolve");
        assert!(interrupt.is_triggered());
    }

    #[tokio::test]
    async fn test_first_signal_triggers_without_forcing_exit() {
        let (handle, interrupt) = Interrupt::new();
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(()).unwrap();
        drop(tx);

        assert!(!escalate(rx, &handle).await);
        assert!(interrupt.is_triggered());
    }

    #[tokio::test]
    async fn test_second_signal_forces_exit() {
        let (handle, interrupt) = Interrupt::new();
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(()).unwrap();
        tx.send(()).unwrap();

        assert!(escalate(rx, &handle).await);
        assert!(interrupt.is_triggered());
    }

    #[tokio::test]
    async fn test_no_signal_never_triggers() {
        let (handle, interrupt) = Interrupt::new();
        let (tx, rx) = mpsc::unbounded_channel::<()>();
        drop(tx);

        assert!(!escalate(rx, &handle).await);
        assert!(!interrupt.is_triggered());
    }

    #[tokio::test]
    async fn test_never_does_not_fire() {
        let mut interrupt = Interrupt::never();
        let result = tokio::time::timeout(Duration::from_millis(50), interrupt.wait()).await;
        assert!(result.is_err());
    }
}
