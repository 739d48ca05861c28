use std::{fmt, sync::Arc, time::Duration};

use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::store::ClusterStore;

/// Keeps the lease on one document alive while a dispatch cycle runs.
///
/// The renewal loop is the only party that cancels `cycle`; finishing the
/// work stops the heartbeat, never the other way round.
pub struct Heartbeat {
    stop: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Heartbeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let running = self
            .handle
            .try_lock()
            .map(|guard| guard.is_some())
            .unwrap_or(true);
        f.debug_struct("Heartbeat")
            .field("running", &running)
            .field("stopped", &self.stop.is_cancelled())
            .finish()
    }
}

impl Heartbeat {
    /// Spawn the renewal loop. The first renewal happens one `interval`
    /// after start; dequeue has just granted a fresh lease.
    pub fn start(
        store: Arc<dyn ClusterStore>,
        key: String,
        interval: Duration,
        cycle: CancellationToken,
    ) -> Self {
        let stop = CancellationToken::new();
        let stop_signal = stop.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_signal.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                match store.lease(&key).await {
                    Ok(doc) => {
                        trace!(key = %key, expires = ?doc.lease_expires, "lease renewed");
                    }
                    Err(err) => {
                        warn!(key = %key, error = %err, "lease renewal failed");
                        cycle.cancel();
                        break;
                    }
                }
            }
        });

        Self {
            stop,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Signal the loop and wait for it to exit. Later calls return at once.
    pub async fn stop(&self) {
        self.stop.cancel();
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            warn!(error = %err, "heartbeat task ended abnormally");
        }
    }
}
