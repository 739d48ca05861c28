//! Recording fakes shared by unit tests.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use kubeforge_model::{Cluster, ClusterDocument, ClusterProperties, ProvisioningState};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::{
    cloud::{
        CloudClients, ClusterActions, DeploymentsClient, ProviderResult, ResourcesClient,
    },
    error::{ClusterError, Result},
    graph::{AssetRegistry, GraphCipher, GraphStore},
    store::{BlobKey, BlobStore, ClusterStore, InMemoryBlobStore, InMemoryClusterStore},
};

pub(crate) const KEY: &str = "/subscriptions/sub/resourcegroups/rg/providers/kubeforge/clusters/dev";

/// Cloud whose calls are recorded and whose deployment results are scripted
/// in submission order. Unscripted calls succeed.
#[derive(Default)]
pub(crate) struct FakeCloud {
    pub calls: Mutex<Vec<String>>,
    pub submits: Mutex<VecDeque<ProviderResult<()>>>,
    pub group_deletes: Mutex<VecDeque<ProviderResult<()>>>,
    pub bootstrap_ready: AtomicBool,
    pub api_ready: AtomicBool,
    pub version_ready: AtomicBool,
    pub failure_log: Mutex<Vec<String>>,
}

impl FakeCloud {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            bootstrap_ready: AtomicBool::new(true),
            api_ready: AtomicBool::new(true),
            version_ready: AtomicBool::new(true),
            failure_log: Mutex::new(vec!["bootstrap journal: etcd not healthy".into()]),
            ..Self::default()
        })
    }

    pub async fn script_submits(&self, results: Vec<ProviderResult<()>>) {
        self.submits.lock().await.extend(results);
    }

    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    async fn record(&self, call: impl Into<String>) {
        self.calls.lock().await.push(call.into());
    }

    pub fn clients(self: &Arc<Self>) -> CloudClients {
        CloudClients {
            deployments: Arc::clone(self) as Arc<dyn DeploymentsClient>,
            resources: Arc::clone(self) as Arc<dyn ResourcesClient>,
            actions: Arc::clone(self) as Arc<dyn ClusterActions>,
        }
    }
}

#[async_trait]
impl DeploymentsClient for FakeCloud {
    async fn create_or_update_and_wait(
        &self,
        _: &str,
        _: &str,
        _: &Value,
        parameters: &Value,
    ) -> ProviderResult<()> {
        let template = if parameters.get("storageAccountName").is_some() {
            "deploy:storage"
        } else {
            "deploy:resources"
        };
        self.record(template).await;
        self.submits.lock().await.pop_front().unwrap_or(Ok(()))
    }

    async fn wait(&self, _: &str, _: &str) -> ProviderResult<()> {
        self.record("wait").await;
        Ok(())
    }
}

#[async_trait]
impl ResourcesClient for FakeCloud {
    async fn create_or_update_group(&self, resource_group: &str, _: &str) -> ProviderResult<()> {
        self.record(format!("create_group:{resource_group}")).await;
        Ok(())
    }

    async fn delete_group_and_wait(&self, resource_group: &str) -> ProviderResult<()> {
        self.record(format!("delete_group:{resource_group}")).await;
        self.group_deletes.lock().await.pop_front().unwrap_or(Ok(()))
    }

    async fn delete_resource(&self, _: &str, name: &str) -> ProviderResult<()> {
        self.record(format!("delete_resource:{name}")).await;
        Ok(())
    }
}

#[async_trait]
impl ClusterActions for FakeCloud {
    async fn bootstrap_config_map_ready(&self, _: &str) -> ProviderResult<bool> {
        self.record("bootstrap_config_map_ready").await;
        Ok(self.bootstrap_ready.load(Ordering::SeqCst))
    }

    async fn api_servers_ready(&self, _: &str) -> ProviderResult<bool> {
        self.record("api_servers_ready").await;
        Ok(self.api_ready.load(Ordering::SeqCst))
    }

    async fn cluster_version_ready(&self, _: &str) -> ProviderResult<bool> {
        self.record("cluster_version_ready").await;
        Ok(self.version_ready.load(Ordering::SeqCst))
    }

    async fn gather_failure_logs(&self, _: &str) -> Vec<String> {
        self.record("gather_failure_logs").await;
        self.failure_log.lock().await.clone()
    }
}

/// Blob store whose writes to one key fail a fixed number of times.
#[derive(Debug)]
pub(crate) struct FailingBlobs {
    inner: InMemoryBlobStore,
    key: BlobKey,
    failures: AtomicUsize,
}

impl FailingBlobs {
    pub fn new(key: BlobKey, failures: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryBlobStore::new(),
            key,
            failures: AtomicUsize::new(failures),
        })
    }
}

#[async_trait]
impl BlobStore for FailingBlobs {
    async fn exists(&self, key: &BlobKey) -> Result<bool> {
        self.inner.exists(key).await
    }

    async fn get(&self, key: &BlobKey) -> Result<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &BlobKey, bytes: &[u8]) -> Result<()> {
        if key.as_str() == self.key.as_str()
            && self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok()
        {
            return Err(ClusterError::Blob(format!("write to {key} failed")));
        }
        self.inner.put(key, bytes).await
    }

    async fn delete(&self, key: &BlobKey) -> Result<()> {
        self.inner.delete(key).await
    }
}

pub(crate) fn cluster(state: ProvisioningState) -> Cluster {
    Cluster {
        id: "/subscriptions/SUB/resourceGroups/RG/providers/Kubeforge/clusters/dev".into(),
        name: "dev".into(),
        location: "eastus".into(),
        properties: ClusterProperties {
            provisioning_state: Some(state),
            resource_group: "kubeforge-dev".into(),
            domain: "example.com".into(),
            ..ClusterProperties::default()
        },
    }
}

pub(crate) fn memory_store() -> InMemoryClusterStore {
    InMemoryClusterStore::new(Duration::from_secs(60))
}

/// Create a document in `state` and claim it the way a worker would.
pub(crate) async fn claimed(store: &InMemoryClusterStore, doc: ClusterDocument) -> ClusterDocument {
    store.create(doc).await.expect("create document");
    store
        .dequeue()
        .await
        .expect("dequeue")
        .expect("document is claimable")
}

pub(crate) fn graph_store(blobs: Arc<dyn BlobStore>) -> GraphStore {
    GraphStore::new(
        blobs,
        GraphCipher::from_secret(b"test secret").expect("cipher"),
        AssetRegistry::installer(),
    )
}
