//! Background expiration sweep.

use crate::manager::SessionManager;
use module_system::ShutdownSignal;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Spawns the periodic expiration sweep for a session manager.
///
/// The task runs one [`SessionManager::sweep_once`] pass per interval and
/// exits promptly when the shutdown signal fires, including mid-pass.
pub fn spawn_sweep(manager: Arc<SessionManager>, shutdown: ShutdownSignal) -> JoinHandle<()> {
    let period = manager.config().sweep_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so a freshly started
        // server doesn't sweep before any session exists.
        ticker.tick().await;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {
                    manager.sweep_once(Some(&shutdown)).await;
                }
            }
        }
        debug!("session sweep task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::SessionConfig;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread")]
    async fn sweep_task_exits_on_shutdown() {
        let manager = Arc::new(SessionManager::new(SessionConfig {
            sweep_interval: Duration::from_millis(10),
            ..SessionConfig::default()
        }));
        let shutdown = ShutdownSignal::new();
        let handle = spawn_sweep(manager, shutdown.clone());

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweep task should stop after shutdown")
            .expect("sweep task should not panic");
    }
}
