//! Periodic cache sweep on a tokio interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::TieredCache;

/// Handle for the background sweep task.
///
/// `shutdown()` stops it and waits for the task; dropping the handle only
/// signals the stop.
pub struct SweeperHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Sweep `cache` every `interval` until the handle is shut down or dropped.
/// Must be called inside a tokio runtime.
pub fn spawn_sweeper(cache: Arc<TieredCache>, interval: Duration) -> SweeperHandle {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
    let period = interval.max(Duration::from_millis(10));

    let task = tokio::spawn(async move {
        tracing::info!(interval_ms = period.as_millis() as u64, "Cache sweeper started");
        let mut ticker = tokio::time::interval(period);
        // First tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = ticker.tick() => {
                    cache.sweep();
                }
            }
        }
        tracing::info!("Cache sweeper stopped");
    });

    SweeperHandle {
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    }
}
