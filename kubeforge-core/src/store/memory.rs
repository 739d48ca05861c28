use std::{collections::BTreeMap, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use kubeforge_model::{AsyncOperationDocument, ClusterDocument, ProvisioningState};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{ClusterError, Result};

use super::{AsyncOperationMutator, AsyncOperationStore, BlobKey, BlobStore, ClusterStore, Mutator};

/// Process-local cluster store. Clones share state; [`Self::with_owner`]
/// gives a handle that competes for leases under a different identity, the
/// way a second backend process would.
#[derive(Clone)]
pub struct InMemoryClusterStore {
    owner: String,
    lease_ttl: Duration,
    docs: Arc<Mutex<BTreeMap<String, ClusterDocument>>>,
}

impl fmt::Debug for InMemoryClusterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("InMemoryClusterStore");
        debug.field("owner", &self.owner).field("lease_ttl", &self.lease_ttl);
        match self.docs.try_lock() {
            Ok(docs) => {
                debug.field("documents", &docs.len());
            }
            Err(_) => {
                debug.field("documents", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl InMemoryClusterStore {
    pub fn new(lease_ttl: Duration) -> Self {
        Self {
            owner: Uuid::now_v7().to_string(),
            lease_ttl,
            docs: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    pub fn with_owner(&self, owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            lease_ttl: self.lease_ttl,
            docs: Arc::clone(&self.docs),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Drop whatever lease is held on `key`, as an operator would when
    /// evicting a stuck worker.
    pub async fn revoke_lease(&self, key: &str) -> Result<()> {
        let mut docs = self.docs.lock().await;
        let doc = docs
            .get_mut(key)
            .ok_or_else(|| ClusterError::NotFound(key.to_string()))?;
        doc.lease_owner = None;
        doc.lease_expires = None;
        doc.etag += 1;
        Ok(())
    }

    /// Copies of every stored document in key order.
    pub async fn list(&self) -> Vec<ClusterDocument> {
        self.docs.lock().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.docs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.lock().await.is_empty()
    }

    fn lease_expiry(&self) -> chrono::DateTime<Utc> {
        Utc::now()
            + chrono::Duration::from_std(self.lease_ttl).unwrap_or(chrono::Duration::seconds(60))
    }

    async fn apply(&self, key: &str, require_lease: bool, f: Mutator<'_>) -> Result<ClusterDocument> {
        let mut docs = self.docs.lock().await;
        let current = docs
            .get(key)
            .ok_or_else(|| ClusterError::NotFound(key.to_string()))?;

        if require_lease && !current.is_leased_by(&self.owner, Utc::now()) {
            return Err(ClusterError::LostLease(key.to_string()));
        }

        let mut next = current.clone();
        f(&mut next)?;
        next.etag = current.etag + 1;
        docs.insert(key.to_string(), next.clone());
        Ok(next)
    }
}

#[async_trait]
impl ClusterStore for InMemoryClusterStore {
    async fn create(&self, doc: ClusterDocument) -> Result<ClusterDocument> {
        doc.validate_key()?;
        let mut docs = self.docs.lock().await;
        if docs.contains_key(&doc.key) {
            return Err(ClusterError::AlreadyExists(doc.key));
        }
        docs.insert(doc.key.clone(), doc.clone());
        Ok(doc)
    }

    async fn get(&self, key: &str) -> Result<ClusterDocument> {
        self.docs
            .lock()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(key.to_string()))
    }

    async fn dequeue(&self) -> Result<Option<ClusterDocument>> {
        let now = Utc::now();
        let expires = self.lease_expiry();
        let mut docs = self.docs.lock().await;

        let claimable = docs.values_mut().find(|doc| {
            doc.provisioning_state().is_some_and(|state| !state.is_terminal())
                && doc.lease_available(now)
        });

        Ok(claimable.map(|doc| {
            doc.lease_owner = Some(self.owner.clone());
            doc.lease_expires = Some(expires);
            doc.dequeues += 1;
            doc.etag += 1;
            doc.clone()
        }))
    }

    async fn lease(&self, key: &str) -> Result<ClusterDocument> {
        let expires = self.lease_expiry();
        self.apply(key, true, &mut |doc: &mut ClusterDocument| {
            doc.lease_expires = Some(expires);
            Ok(())
        })
        .await
    }

    async fn end_lease(
        &self,
        key: &str,
        state: ProvisioningState,
        failed_state: Option<ProvisioningState>,
    ) -> Result<ClusterDocument> {
        self.apply(key, true, &mut |doc: &mut ClusterDocument| {
            let props = &mut doc.cluster.properties;
            props.provisioning_state = Some(state);
            props.failed_provisioning_state = failed_state;

            doc.lease_owner = None;
            doc.lease_expires = None;

            if state != ProvisioningState::Failed {
                doc.dequeues = 0;
            }
            if state.is_terminal() {
                doc.async_operation_id = None;
            }
            Ok(())
        })
        .await
    }

    async fn patch(&self, key: &str, f: Mutator<'_>) -> Result<ClusterDocument> {
        self.apply(key, false, f).await
    }

    async fn patch_with_lease(&self, key: &str, f: Mutator<'_>) -> Result<ClusterDocument> {
        self.apply(key, true, f).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.docs
            .lock()
            .await
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| ClusterError::NotFound(key.to_string()))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryAsyncOperationStore {
    docs: Arc<Mutex<BTreeMap<String, AsyncOperationDocument>>>,
}

impl fmt::Debug for InMemoryAsyncOperationStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.docs.try_lock().map(|docs| docs.len()).unwrap_or_default();
        f.debug_struct("InMemoryAsyncOperationStore")
            .field("documents", &count)
            .finish()
    }
}

impl InMemoryAsyncOperationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AsyncOperationStore for InMemoryAsyncOperationStore {
    async fn create(&self, doc: AsyncOperationDocument) -> Result<AsyncOperationDocument> {
        let mut docs = self.docs.lock().await;
        if docs.contains_key(&doc.id) {
            return Err(ClusterError::AlreadyExists(doc.id));
        }
        docs.insert(doc.id.clone(), doc.clone());
        Ok(doc)
    }

    async fn get(&self, id: &str) -> Result<AsyncOperationDocument> {
        self.docs
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(id.to_string()))
    }

    async fn patch(&self, id: &str, f: AsyncOperationMutator<'_>) -> Result<AsyncOperationDocument> {
        let mut docs = self.docs.lock().await;
        let current = docs
            .get(id)
            .ok_or_else(|| ClusterError::NotFound(id.to_string()))?;

        let mut next = current.clone();
        f(&mut next)?;
        next.etag = current.etag + 1;
        docs.insert(id.to_string(), next.clone());
        Ok(next)
    }
}

/// Blob store for tests and dry runs; nothing survives the process.
#[derive(Clone, Default)]
pub struct InMemoryBlobStore {
    blobs: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl fmt::Debug for InMemoryBlobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.blobs.try_lock().map(|blobs| blobs.len()).unwrap_or_default();
        f.debug_struct("InMemoryBlobStore").field("blobs", &count).finish()
    }
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.blobs.lock().await.keys().cloned().collect()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn exists(&self, key: &BlobKey) -> Result<bool> {
        Ok(self.blobs.lock().await.contains_key(key.as_str()))
    }

    async fn get(&self, key: &BlobKey) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.lock().await.get(key.as_str()).cloned())
    }

    async fn put(&self, key: &BlobKey, bytes: &[u8]) -> Result<()> {
        self.blobs
            .lock()
            .await
            .insert(key.as_str().to_string(), bytes.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &BlobKey) -> Result<()> {
        self.blobs.lock().await.remove(key.as_str());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use kubeforge_model::{Cluster, ClusterProperties};

    use super::*;

    fn doc(name: &str, state: ProvisioningState) -> ClusterDocument {
        ClusterDocument::new(Cluster {
            id: format!("/subscriptions/sub/clusters/{name}"),
            name: name.into(),
            location: "eastus".into(),
            properties: ClusterProperties {
                provisioning_state: Some(state),
                ..ClusterProperties::default()
            },
        })
    }

    fn store() -> InMemoryClusterStore {
        InMemoryClusterStore::new(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn dequeue_claims_only_in_flight_documents() -> Result<()> {
        let store = store();
        store.create(doc("done", ProvisioningState::Succeeded)).await?;
        let pending = store.create(doc("pending", ProvisioningState::Creating)).await?;

        let claimed = store.dequeue().await?.expect("pending document");
        assert_eq!(claimed.key, pending.key);
        assert_eq!(claimed.dequeues, 1);
        assert_eq!(claimed.lease_owner.as_deref(), Some(store.owner()));

        assert!(store.dequeue().await?.is_none(), "lease is held");
        Ok(())
    }

    #[tokio::test]
    async fn other_owners_lose_patch_with_lease() -> Result<()> {
        let store = store();
        let created = store.create(doc("a", ProvisioningState::Updating)).await?;
        store.dequeue().await?;

        let intruder = store.with_owner("intruder");
        let err = intruder
            .patch_with_lease(&created.key, &mut |_doc: &mut ClusterDocument| Ok(()))
            .await
            .expect_err("not the lease owner");
        assert!(matches!(err, ClusterError::LostLease(_)));

        let patched = store
            .patch_with_lease(&created.key, &mut |doc: &mut ClusterDocument| {
                doc.cluster.properties.storage_suffix = "xyz12".into();
                Ok(())
            })
            .await?;
        assert_eq!(patched.cluster.properties.storage_suffix, "xyz12");
        Ok(())
    }

    #[tokio::test]
    async fn failed_mutator_leaves_document_untouched() -> Result<()> {
        let store = store();
        let created = store.create(doc("a", ProvisioningState::Creating)).await?;

        let result = store
            .patch(&created.key, &mut |doc: &mut ClusterDocument| {
                doc.cluster.properties.domain = "changed".into();
                Err(ClusterError::Internal("nope".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(store.get(&created.key).await?, created);
        Ok(())
    }

    #[tokio::test]
    async fn end_lease_resets_dequeues_unless_failed() -> Result<()> {
        let store = store();
        let mut pending = doc("a", ProvisioningState::Creating);
        pending.async_operation_id = Some("op".into());
        let created = store.create(pending).await?;

        store.dequeue().await?;
        let ended = store
            .end_lease(&created.key, ProvisioningState::Creating, None)
            .await?;
        assert_eq!(ended.dequeues, 0);
        assert_eq!(ended.async_operation_id.as_deref(), Some("op"));
        assert!(ended.lease_owner.is_none());

        store.dequeue().await?;
        let failed = store
            .end_lease(
                &created.key,
                ProvisioningState::Failed,
                Some(ProvisioningState::Creating),
            )
            .await?;
        assert_eq!(failed.dequeues, 1);
        assert_eq!(failed.async_operation_id, None);
        assert_eq!(
            failed.cluster.properties.failed_provisioning_state,
            Some(ProvisioningState::Creating)
        );
        Ok(())
    }

    #[tokio::test]
    async fn revoked_lease_cannot_be_renewed() -> Result<()> {
        let store = store();
        let created = store.create(doc("a", ProvisioningState::Deleting)).await?;
        store.dequeue().await?;
        store.lease(&created.key).await?;

        store.revoke_lease(&created.key).await?;
        assert!(matches!(
            store.lease(&created.key).await,
            Err(ClusterError::LostLease(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn keys_must_be_lowercase() {
        let mut upper = doc("a", ProvisioningState::Creating);
        upper.key = "/Subscriptions/X".into();
        assert!(matches!(
            store().create(upper).await,
            Err(ClusterError::Model(_))
        ));
    }
}
