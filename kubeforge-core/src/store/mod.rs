//! Persistence ports.
//!
//! The document store is an external collaborator; only its contract lives
//! here together with an in-memory adapter. Blob storage has a cacache
//! adapter for single-host deployments.

pub mod blob;
pub mod memory;

use std::fmt;

use async_trait::async_trait;
use kubeforge_model::{AsyncOperationDocument, ClusterDocument, ProvisioningState};

use crate::error::Result;

pub use blob::CacacheBlobStore;
pub use memory::{InMemoryAsyncOperationStore, InMemoryBlobStore, InMemoryClusterStore};

/// Edits a document in place. May be invoked more than once if the store
/// retries on a concurrent write, so it must be repeatable.
pub type Mutator<'a> = &'a mut (dyn FnMut(&mut ClusterDocument) -> Result<()> + Send);

pub type AsyncOperationMutator<'a> =
    &'a mut (dyn FnMut(&mut AsyncOperationDocument) -> Result<()> + Send);

/// Optimistic-concurrency store of cluster documents with lease primitives.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn create(&self, doc: ClusterDocument) -> Result<ClusterDocument>;

    async fn get(&self, key: &str) -> Result<ClusterDocument>;

    /// Claim the next document with work in flight whose lease is free.
    async fn dequeue(&self) -> Result<Option<ClusterDocument>>;

    /// Extend the lease this store instance holds on `key`.
    async fn lease(&self, key: &str) -> Result<ClusterDocument>;

    /// Record the outcome of a dispatch cycle and give up the lease.
    async fn end_lease(
        &self,
        key: &str,
        state: ProvisioningState,
        failed_state: Option<ProvisioningState>,
    ) -> Result<ClusterDocument>;

    async fn patch(&self, key: &str, f: Mutator<'_>) -> Result<ClusterDocument>;

    /// Like [`ClusterStore::patch`] but fails with a lost-lease error unless
    /// this store instance still holds the lease.
    async fn patch_with_lease(&self, key: &str, f: Mutator<'_>) -> Result<ClusterDocument>;

    async fn delete(&self, key: &str) -> Result<()>;
}

#[async_trait]
pub trait AsyncOperationStore: Send + Sync {
    async fn create(&self, doc: AsyncOperationDocument) -> Result<AsyncOperationDocument>;

    async fn get(&self, id: &str) -> Result<AsyncOperationDocument>;

    async fn patch(&self, id: &str, f: AsyncOperationMutator<'_>) -> Result<AsyncOperationDocument>;
}

/// Location of one object in blob storage, scoped to a cluster.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BlobKey(String);

impl BlobKey {
    pub fn new(cluster_key: &str, container: &str, name: &str) -> Self {
        Self(format!("{}/{container}/{name}", cluster_key.trim_start_matches('/')))
    }

    /// Encrypted asset graph of one installation.
    pub fn graph(cluster_key: &str) -> Self {
        Self::new(cluster_key, "kubeforge", "graph")
    }

    pub fn bootstrap_ignition(cluster_key: &str) -> Self {
        Self::new(cluster_key, "ignition", "bootstrap.ign")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BlobKey").field(&self.0).finish()
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn exists(&self, key: &BlobKey) -> Result<bool>;

    async fn get(&self, key: &BlobKey) -> Result<Option<Vec<u8>>>;

    async fn put(&self, key: &BlobKey, bytes: &[u8]) -> Result<()>;

    /// Removing a missing blob is not an error.
    async fn delete(&self, key: &BlobKey) -> Result<()>;
}
