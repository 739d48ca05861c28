use std::{fmt, sync::Arc};

use chrono::Utc;
use kubeforge_model::{AsyncOperationDocument, CloudError, Cluster, ClusterSnapshot, ProvisioningState};
use tracing::debug;

use crate::{
    classify::UserErrorPipeline,
    error::{ClusterError, Result},
    store::AsyncOperationStore,
};

/// Finalizes async operation records, the only externally visible status of
/// a long-running operation.
#[derive(Clone)]
pub struct AsyncOperationTracker {
    store: Arc<dyn AsyncOperationStore>,
    pipeline: Arc<UserErrorPipeline>,
}

impl fmt::Debug for AsyncOperationTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncOperationTracker")
            .field("pipeline", &self.pipeline.stage_names())
            .finish_non_exhaustive()
    }
}

impl AsyncOperationTracker {
    pub fn new(store: Arc<dyn AsyncOperationStore>, pipeline: Arc<UserErrorPipeline>) -> Self {
        Self { store, pipeline }
    }

    pub fn pipeline(&self) -> &UserErrorPipeline {
        &self.pipeline
    }

    /// Record the outcome of an operation. `id` may be empty when the
    /// document carried no operation, which makes this a no-op.
    ///
    /// Failures carry only what the pipeline classifies as user-actionable;
    /// everything else becomes the generic internal error. Other states get
    /// a snapshot of the cluster with secrets removed.
    pub async fn update(
        &self,
        id: &str,
        cluster: &Cluster,
        state: ProvisioningState,
        failure: Option<&ClusterError>,
    ) -> Result<Option<AsyncOperationDocument>> {
        if id.is_empty() {
            return Ok(None);
        }

        let error = match (state, failure) {
            (ProvisioningState::Failed, Some(err)) => Some(self.pipeline.user_visible(err).body),
            (ProvisioningState::Failed, None) => Some(CloudError::internal_server_error().body),
            _ => None,
        };
        let snapshot = (state != ProvisioningState::Failed).then(|| ClusterSnapshot {
            provisioning_state: Some(state),
            ..ClusterSnapshot::redacted(cluster)
        });
        let end_time = Utc::now();

        debug!(operation = id, state = %state, "updating async operation");
        let doc = self
            .store
            .patch(id, &mut |doc: &mut AsyncOperationDocument| {
                let operation = &mut doc.async_operation;
                operation.provisioning_state = state;
                operation.end_time = Some(end_time);
                operation.error = error.clone();
                if snapshot.is_some() {
                    operation.properties = snapshot.clone();
                }
                Ok(())
            })
            .await?;
        Ok(Some(doc))
    }
}

#[cfg(test)]
mod tests {
    use kubeforge_model::CloudErrorCode;

    use super::*;
    use crate::{
        store::{AsyncOperationStore, InMemoryAsyncOperationStore},
        testing::{self, KEY},
    };

    async fn tracker() -> (AsyncOperationTracker, InMemoryAsyncOperationStore) {
        let store = InMemoryAsyncOperationStore::new();
        store
            .create(AsyncOperationDocument::new("op-1", KEY, ProvisioningState::Creating))
            .await
            .expect("create operation");
        let tracker =
            AsyncOperationTracker::new(Arc::new(store.clone()), Arc::new(UserErrorPipeline::default()));
        (tracker, store)
    }

    fn cluster() -> Cluster {
        let mut cluster = testing::cluster(ProvisioningState::Succeeded);
        cluster.properties.ssh_key = Some("private".into());
        cluster.properties.registry_password = Some("hunter2".into());
        cluster
    }

    #[tokio::test]
    async fn empty_id_is_a_no_op() {
        let (tracker, _) = tracker().await;
        let updated = tracker
            .update("", &cluster(), ProvisioningState::Succeeded, None)
            .await
            .expect("no-op");
        assert!(updated.is_none());
    }

    #[tokio::test]
    async fn success_attaches_a_redacted_snapshot() {
        let (tracker, store) = tracker().await;
        tracker
            .update("op-1", &cluster(), ProvisioningState::Succeeded, None)
            .await
            .expect("update");

        let op = store.get("op-1").await.expect("operation").async_operation;
        assert_eq!(op.provisioning_state, ProvisioningState::Succeeded);
        assert!(op.end_time.is_some());
        assert!(op.error.is_none());
        let snapshot = serde_json::to_string(&op.properties.expect("snapshot")).expect("json");
        assert!(!snapshot.contains("hunter2"));
        assert!(!snapshot.contains("private"));
    }

    #[tokio::test]
    async fn unclassified_failures_stay_generic() {
        let (tracker, store) = tracker().await;
        let err = ClusterError::Internal("etcd quorum lost at 10.0.0.4".into());
        tracker
            .update("op-1", &cluster(), ProvisioningState::Failed, Some(&err))
            .await
            .expect("update");

        let op = store.get("op-1").await.expect("operation").async_operation;
        let error = op.error.expect("error body");
        assert_eq!(error.code, "InternalServerError");
        assert_eq!(error.message, "Internal server error.");
        assert!(op.properties.is_none());
    }

    #[tokio::test]
    async fn classified_failures_are_surfaced() {
        let (tracker, store) = tracker().await;
        let err = ClusterError::Step {
            step: "deploy_resources_template",
            source: Box::new(
                CloudError::new(400, CloudErrorCode::ResourceQuotaExceeded, "", "Cores quota exceeded.")
                    .into(),
            ),
        };
        tracker
            .update("op-1", &cluster(), ProvisioningState::Failed, Some(&err))
            .await
            .expect("update");

        let error = store
            .get("op-1")
            .await
            .expect("operation")
            .async_operation
            .error
            .expect("error body");
        assert_eq!(error.code, "ResourceQuotaExceeded");
        assert_eq!(error.message, "Cores quota exceeded.");
    }
}
