//! Cluster requests read from a JSON file at startup.

use std::path::Path;

use anyhow::Context;
use kubeforge_core::store::{AsyncOperationStore, ClusterStore};
use kubeforge_model::{AsyncOperationDocument, Cluster, ClusterDocument, ProvisioningState};
use tracing::info;
use uuid::Uuid;

/// Requested clusters. A cluster without a provisioning state is created.
pub fn read(path: &Path) -> anyhow::Result<Vec<Cluster>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading seed file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing seed file {}", path.display()))
}

/// Store each request as a document with a fresh async operation, the way
/// the front end records an accepted request.
pub async fn submit(
    requests: Vec<Cluster>,
    clusters: &dyn ClusterStore,
    operations: &dyn AsyncOperationStore,
) -> anyhow::Result<usize> {
    let mut submitted = 0;
    for mut cluster in requests {
        let state = *cluster
            .properties
            .provisioning_state
            .get_or_insert(ProvisioningState::Creating);
        let operation_id = Uuid::now_v7().to_string();

        let mut doc = ClusterDocument::new(cluster);
        doc.async_operation_id = Some(operation_id.clone());
        operations
            .create(AsyncOperationDocument::new(
                operation_id.clone(),
                doc.key.clone(),
                state,
            ))
            .await
            .with_context(|| format!("recording async operation for {}", doc.key))?;
        let doc = clusters
            .create(doc)
            .await
            .context("submitting cluster document")?;

        info!(key = %doc.key, operation = %operation_id, state = %state, "submitted");
        submitted += 1;
    }
    Ok(submitted)
}
