//! Cooperative shutdown signal shared by background workers.
//!
//! Every long-running worker (bus subscription workers, the session
//! expiration sweep) holds a clone of the signal and must exit within its
//! declared stop timeout after it fires. Built on a watch channel so workers
//! can `await` it inside `select!` instead of polling.

use std::sync::Arc;
use tokio::sync::watch;

/// Clonable shutdown signal. Triggering is idempotent.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Signals all holders to shut down.
    pub fn trigger(&self) {
        // Send only fails when every receiver is gone, which is fine here.
        let _ = self.tx.send(true);
    }

    /// Non-blocking check, for loops that yield between batches.
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the signal has been triggered.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        // wait_for returns immediately if already true.
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_resolves_after_trigger() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_triggered());

        let waiter = signal.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });

        signal.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter should resolve")
            .expect("waiter task should not panic");
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn wait_resolves_immediately_when_already_triggered() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        signal.trigger(); // idempotent
        tokio::time::timeout(Duration::from_millis(50), signal.wait())
            .await
            .expect("already-triggered wait should not block");
    }
}
