use std::{any::Any, fmt, panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use kubeforge_model::{ClusterDocument, ProvisioningState};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

use crate::{
    classify::is_4xx_error,
    config::{DispatchConfig, LeaseConfig},
    error::{ClusterError, Result},
    heartbeat::Heartbeat,
    operation::AsyncOperationTracker,
    store::ClusterStore,
    telemetry::{CycleTelemetry, MetricsEmitter},
};

use super::manager::{ClusterManager, ManagerFactory};

/// How a finished operation is reported in the result log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultType {
    Success,
    UserError,
    ServiceError,
}

impl ResultType {
    pub fn from_status(status: u16) -> Self {
        match status {
            0..400 => ResultType::Success,
            400..500 => ResultType::UserError,
            _ => ResultType::ServiceError,
        }
    }

    /// Errors without an HTTP status count against the service.
    pub fn classify(err: Option<&ClusterError>) -> Self {
        let Some(err) = err else {
            return ResultType::Success;
        };
        if let Some(cloud) = err.cloud_error() {
            return ResultType::from_status(cloud.status_code);
        }
        match err.provider_error() {
            Some(provider) if is_4xx_error(provider) => ResultType::UserError,
            _ => ResultType::ServiceError,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResultType::Success => "Success",
            ResultType::UserError => "UserError",
            ResultType::ServiceError => "ServiceError",
        }
    }
}

fn operation_type(state: Option<ProvisioningState>) -> &'static str {
    match state {
        Some(ProvisioningState::Creating) => "create",
        Some(ProvisioningState::Updating) => "update",
        Some(ProvisioningState::Deleting) => "delete",
        _ => "unknown",
    }
}

fn operation_name(state: Option<ProvisioningState>) -> &'static str {
    match state {
        Some(ProvisioningState::Creating) => "Create",
        Some(ProvisioningState::Updating) => "Update",
        Some(ProvisioningState::Deleting) => "Delete",
        _ => "Unknown",
    }
}

/// What a manager call left behind.
enum Outcome {
    /// Creation made progress but has phases left.
    Pending,
    Succeeded,
    Deleted,
    Failed(ClusterError),
}

/// Drives one claimed document through a dispatch cycle and records the
/// result on the document and its async operation.
pub struct Dispatcher {
    store: Arc<dyn ClusterStore>,
    tracker: AsyncOperationTracker,
    managers: Arc<dyn ManagerFactory>,
    metrics: Arc<dyn MetricsEmitter>,
    lease: LeaseConfig,
    config: DispatchConfig,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("tracker", &self.tracker)
            .field("metrics", &self.metrics)
            .field("lease", &self.lease)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn ClusterStore>,
        tracker: AsyncOperationTracker,
        managers: Arc<dyn ManagerFactory>,
        metrics: Arc<dyn MetricsEmitter>,
        lease: LeaseConfig,
        config: DispatchConfig,
    ) -> Self {
        Self {
            store,
            tracker,
            managers,
            metrics,
            lease,
            config,
        }
    }

    pub fn store(&self) -> Arc<dyn ClusterStore> {
        Arc::clone(&self.store)
    }

    /// Process a document returned by `dequeue`. Manager failures are
    /// recorded as Failed and do not make this return an error; only
    /// bookkeeping failures and an unexpected provisioning state do.
    pub async fn handle(&self, doc: ClusterDocument) -> Result<()> {
        let operation = operation_type(doc.provisioning_state());
        let span = info_span!("dispatch", key = %doc.key, operation);
        self.handle_inner(doc, operation).instrument(span).await
    }

    async fn handle_inner(&self, doc: ClusterDocument, operation: &'static str) -> Result<()> {
        let mut telemetry = CycleTelemetry::start(Arc::clone(&self.metrics), operation);

        if doc.dequeues > self.config.max_dequeue_count {
            let err = ClusterError::Internal(format!("dequeued {} times, failing", doc.dequeues));
            warn!(dequeues = doc.dequeues, "poison message");
            telemetry.record(ProvisioningState::Failed);
            return self.end_lease(&doc, ProvisioningState::Failed, Some(&err)).await;
        }

        info!(dequeues = doc.dequeues, "dequeued");

        let cycle = CancellationToken::new();
        let heartbeat = Heartbeat::start(
            Arc::clone(&self.store),
            doc.key.clone(),
            self.lease.renew_interval,
            cycle.clone(),
        );
        let outcome = AssertUnwindSafe(self.run(&doc, cycle))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let message = panic_message(panic.as_ref());
                error!(panic = %message, "manager panicked");
                Ok(Outcome::Failed(ClusterError::Internal(format!("panic: {message}"))))
            });
        heartbeat.stop().await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(error = %err, "refusing to process document");
                return Err(err);
            }
        };

        match outcome {
            Outcome::Pending => {
                info!("installation continues on a later dequeue");
                telemetry.record(ProvisioningState::Creating);
                self.release(&doc, ProvisioningState::Creating).await
            }
            Outcome::Succeeded => {
                telemetry.record(ProvisioningState::Succeeded);
                self.end_lease(&doc, ProvisioningState::Succeeded, None).await
            }
            Outcome::Deleted => {
                telemetry.record(ProvisioningState::Succeeded);
                self.finish_delete(&doc).await
            }
            Outcome::Failed(err) => {
                error!(error = %err, "operation failed");
                telemetry.record(ProvisioningState::Failed);
                self.end_lease(&doc, ProvisioningState::Failed, Some(&err)).await
            }
        }
    }

    /// Build the manager and route by state. The outer error is reserved for
    /// states the dispatcher must never see.
    async fn run(&self, doc: &ClusterDocument, cycle: CancellationToken) -> Result<Outcome> {
        let manager: Box<dyn ClusterManager> = match self.managers.new_manager(doc, cycle).await {
            Ok(manager) => manager,
            Err(err) => return Ok(Outcome::Failed(err)),
        };

        let outcome = match doc.provisioning_state() {
            Some(ProvisioningState::Creating) => {
                info!("creating");
                match manager.create().await {
                    Ok(true) => Outcome::Succeeded,
                    Ok(false) => Outcome::Pending,
                    Err(err) => Outcome::Failed(err),
                }
            }
            Some(ProvisioningState::Updating) => {
                info!("updating");
                manager.update().await.map_or_else(Outcome::Failed, |()| Outcome::Succeeded)
            }
            Some(ProvisioningState::Deleting) => {
                info!("deleting");
                manager.delete().await.map_or_else(Outcome::Failed, |()| Outcome::Deleted)
            }
            other => return Err(ClusterError::UnexpectedProvisioningState(other)),
        };
        Ok(outcome)
    }

    /// Give up the lease without touching the async operation; the operation
    /// is still running from the caller's point of view.
    async fn release(&self, doc: &ClusterDocument, state: ProvisioningState) -> Result<()> {
        self.bounded(async {
            self.store.end_lease(&doc.key, state, None).await?;
            Ok(())
        })
        .await
    }

    /// Finalize the async operation, then record `state` and release the
    /// lease. The lease is released even when the operation update fails.
    async fn end_lease(
        &self,
        doc: &ClusterDocument,
        state: ProvisioningState,
        failure: Option<&ClusterError>,
    ) -> Result<()> {
        let failed_state = (state == ProvisioningState::Failed)
            .then(|| doc.provisioning_state())
            .flatten();

        self.bounded(async {
            let operation = self.finalize_operation(doc, state, failure).await;
            let lease = self.store.end_lease(&doc.key, state, failed_state).await;
            operation?;
            lease?;
            Ok(())
        })
        .await
    }

    async fn finish_delete(&self, doc: &ClusterDocument) -> Result<()> {
        let finalized = self
            .bounded(self.finalize_operation(doc, ProvisioningState::Succeeded, None))
            .await;
        if let Err(err) = finalized {
            return self.end_lease(doc, ProvisioningState::Failed, Some(&err)).await;
        }
        self.bounded(self.store.delete(&doc.key)).await
    }

    async fn finalize_operation(
        &self,
        doc: &ClusterDocument,
        state: ProvisioningState,
        failure: Option<&ClusterError>,
    ) -> Result<()> {
        let id = doc.async_operation_id.as_deref().unwrap_or_default();
        self.tracker.update(id, &doc.cluster, state, failure).await?;
        result_log(doc, state, failure);
        Ok(())
    }

    /// Finalization runs on its own deadline, unaffected by the cycle's
    /// cancellation.
    async fn bounded<F>(&self, work: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        let timeout = self.config.finalize_timeout;
        tokio::time::timeout(timeout, work)
            .await
            .unwrap_or_else(|_| {
                Err(ClusterError::Timeout {
                    what: "dispatch finalization".into(),
                    after: timeout,
                })
            })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else {
        "unknown panic payload".to_string()
    }
}

fn result_log(doc: &ClusterDocument, state: ProvisioningState, failure: Option<&ClusterError>) {
    let result_type = ResultType::classify(failure);
    let error_code = failure
        .and_then(ClusterError::cloud_error)
        .map(|cloud| cloud.body.code.as_str())
        .unwrap_or_default();
    info!(
        result_type = result_type.as_str(),
        operation_type = operation_name(doc.provisioning_state()),
        provisioning_state = %state,
        error_code,
        error_details = failure.map(ToString::to_string).unwrap_or_default(),
        "long running operation finished"
    );
}
