use std::{fmt, sync::Arc, time::Duration};

use futures::future::join_all;
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::DispatchConfig;

use super::dispatcher::Dispatcher;

/// Supervises the dispatch workers of one backend process.
pub struct BackendRuntime {
    dispatcher: Arc<Dispatcher>,
    config: DispatchConfig,
    shutdown_token: CancellationToken,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for BackendRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let worker_handle_count = self
            .worker_handles
            .try_lock()
            .map(|handles| handles.len())
            .unwrap_or_default();

        f.debug_struct("BackendRuntime")
            .field("config", &self.config)
            .field("worker_handle_count", &worker_handle_count)
            .field("shutdown_cancelled", &self.shutdown_token.is_cancelled())
            .finish()
    }
}

impl BackendRuntime {
    pub fn new(dispatcher: Arc<Dispatcher>, config: DispatchConfig) -> Self {
        Self {
            dispatcher,
            config,
            shutdown_token: CancellationToken::new(),
            worker_handles: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub async fn start(&self) {
        let mut handles = self.worker_handles.lock().await;
        for i in 0..self.config.workers {
            let worker_id = format!("dispatch-w{i}");
            let dispatcher = Arc::clone(&self.dispatcher);
            let shutdown = self.shutdown_token.clone();
            let idle_backoff = self.config.idle_backoff;

            handles.push(tokio::spawn(async move {
                run_worker(worker_id, dispatcher, shutdown, idle_backoff).await;
            }));
        }
        info!(workers = self.config.workers, "backend runtime started");
    }

    /// Stop dequeuing and wait for in-flight dispatches to finish.
    pub async fn shutdown(&self) {
        info!("initiating graceful shutdown of backend runtime");
        self.shutdown_token.cancel();

        let handles = {
            let mut guard = self.worker_handles.lock().await;
            std::mem::take(&mut *guard)
        };

        let timeout = self.config.shutdown_timeout;
        match tokio::time::timeout(timeout, join_all(handles)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        warn!("worker task failed: {e:?}");
                    }
                }
            }
            Err(_) => warn!(after = ?timeout, "worker tasks timed out during shutdown"),
        }

        info!("backend runtime shutdown complete");
    }
}

async fn run_worker(
    worker_id: String,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
    idle_backoff: Duration,
) {
    let store = dispatcher.store();
    loop {
        if shutdown.is_cancelled() {
            info!(worker = %worker_id, "worker shutting down");
            break;
        }

        let doc = match store.dequeue().await {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    _ = tokio::time::sleep(idle_backoff) => {}
                }
                continue;
            }
            Err(err) => {
                error!(worker = %worker_id, error = %err, "dequeue failed");
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    _ = tokio::time::sleep(idle_backoff) => {}
                }
                continue;
            }
        };

        debug!(worker = %worker_id, key = %doc.key, "claimed document");
        if let Err(err) = dispatcher.handle(doc).await {
            error!(worker = %worker_id, error = %err, "dispatch failed");
        }
    }
}
