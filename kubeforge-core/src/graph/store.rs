use std::{fmt, sync::Arc};

use tracing::{debug, info};

use crate::{
    error::{ClusterError, Result},
    store::{BlobKey, BlobStore},
};

use super::{AssetRegistry, Graph, GraphCipher, assets::BootstrapIgnition};

/// Encrypted persistence of one installation's graph. The graph is written
/// once after it is first resolved and read back by every later phase.
#[derive(Clone)]
pub struct GraphStore {
    blobs: Arc<dyn BlobStore>,
    cipher: GraphCipher,
    registry: AssetRegistry,
}

impl fmt::Debug for GraphStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphStore")
            .field("cipher", &self.cipher)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl GraphStore {
    pub fn new(blobs: Arc<dyn BlobStore>, cipher: GraphCipher, registry: AssetRegistry) -> Self {
        Self {
            blobs,
            cipher,
            registry,
        }
    }

    pub fn registry(&self) -> &AssetRegistry {
        &self.registry
    }

    pub async fn exists(&self, cluster_key: &str) -> Result<bool> {
        debug!(key = cluster_key, "checking if graph exists");
        self.blobs.exists(&BlobKey::graph(cluster_key)).await
    }

    pub async fn load(&self, cluster_key: &str) -> Result<Graph> {
        info!(key = cluster_key, "load persisted graph");
        let key = BlobKey::graph(cluster_key);
        let sealed = self
            .blobs
            .get(&key)
            .await?
            .ok_or_else(|| ClusterError::NotFound(format!("graph blob {key}")))?;
        let plain = self.cipher.decrypt(&sealed)?;
        self.registry.from_json(&plain)
    }

    /// Persist `graph` and, when it holds one, the bootstrap ignition payload
    /// as a separate blob the bootstrap machine can fetch.
    ///
    /// The graph blob is written last: once [`GraphStore::exists`] reports
    /// it, every side blob is already in place.
    pub async fn save(&self, cluster_key: &str, graph: &Graph) -> Result<()> {
        info!(key = cluster_key, assets = graph.len(), "save graph");
        let plain = self.registry.to_json(graph)?;
        let sealed = self.cipher.encrypt(&plain)?;

        if let Some(ignition) = graph.get::<BootstrapIgnition>() {
            self.blobs
                .put(
                    &BlobKey::bootstrap_ignition(cluster_key),
                    ignition.config.as_bytes(),
                )
                .await?;
        }

        self.blobs.put(&BlobKey::graph(cluster_key), &sealed).await
    }

    pub async fn delete_bootstrap_ignition(&self, cluster_key: &str) -> Result<()> {
        self.blobs
            .delete(&BlobKey::bootstrap_ignition(cluster_key))
            .await
    }

    /// Remove every blob written for the installation.
    pub async fn delete_all(&self, cluster_key: &str) -> Result<()> {
        self.delete_bootstrap_ignition(cluster_key).await?;
        self.blobs.delete(&BlobKey::graph(cluster_key)).await
    }
}
