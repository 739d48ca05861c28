use std::{fmt, sync::Arc};

use async_trait::async_trait;
use kubeforge_model::ClusterDocument;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    classify::{UserErrorPipeline, is_not_found_error, is_resource_group_not_found_error},
    cloud::CloudClients,
    config::InstallerConfig,
    error::{ClusterError, Result},
    graph::GraphStore,
    installer::{DeployRetry, Installer, deploy_template, templates},
    store::ClusterStore,
};

/// Operations the dispatcher routes a claimed document to.
#[async_trait]
pub trait ClusterManager: Send + Sync {
    /// `Ok(false)` means progress was made but installation is not finished;
    /// the document stays Creating and is picked up again by a later dequeue.
    async fn create(&self) -> Result<bool>;

    async fn update(&self) -> Result<()>;

    async fn delete(&self) -> Result<()>;
}

/// Builds a manager for one dispatch cycle. `cancel` is cancelled when the
/// lease is lost.
#[async_trait]
pub trait ManagerFactory: Send + Sync {
    async fn new_manager(
        &self,
        doc: &ClusterDocument,
        cancel: CancellationToken,
    ) -> Result<Box<dyn ClusterManager>>;
}

#[derive(Clone)]
pub struct DefaultManagerFactory {
    store: Arc<dyn ClusterStore>,
    clients: CloudClients,
    graphs: GraphStore,
    config: InstallerConfig,
    classifier: Arc<UserErrorPipeline>,
}

impl fmt::Debug for DefaultManagerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultManagerFactory")
            .field("clients", &self.clients)
            .field("graphs", &self.graphs)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DefaultManagerFactory {
    pub fn new(
        store: Arc<dyn ClusterStore>,
        clients: CloudClients,
        graphs: GraphStore,
        config: InstallerConfig,
    ) -> Self {
        Self {
            store,
            clients,
            graphs,
            config,
            classifier: Arc::new(UserErrorPipeline::default()),
        }
    }

    /// Share the tracker's classifier with the installers this factory builds.
    pub fn with_classifier(mut self, classifier: Arc<UserErrorPipeline>) -> Self {
        self.classifier = classifier;
        self
    }
}

#[async_trait]
impl ManagerFactory for DefaultManagerFactory {
    async fn new_manager(
        &self,
        doc: &ClusterDocument,
        cancel: CancellationToken,
    ) -> Result<Box<dyn ClusterManager>> {
        if doc.cluster.properties.resource_group.is_empty() {
            return Err(ClusterError::Internal(format!(
                "cluster {} has no managed resource group",
                doc.key
            )));
        }

        let installer = Installer::new(
            doc.key.clone(),
            Arc::clone(&self.store),
            self.clients.clone(),
            self.graphs.clone(),
            self.config,
            cancel.clone(),
        )
        .with_classifier(Arc::clone(&self.classifier));

        Ok(Box::new(DefaultManager {
            doc: doc.clone(),
            installer,
            clients: self.clients.clone(),
            graphs: self.graphs.clone(),
            config: self.config,
            cancel,
        }))
    }
}

pub struct DefaultManager {
    doc: ClusterDocument,
    installer: Installer,
    clients: CloudClients,
    graphs: GraphStore,
    config: InstallerConfig,
    cancel: CancellationToken,
}

impl fmt::Debug for DefaultManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultManager")
            .field("key", &self.doc.key)
            .field("installer", &self.installer)
            .finish_non_exhaustive()
    }
}

impl DefaultManager {
    fn resource_group(&self) -> &str {
        &self.doc.cluster.properties.resource_group
    }
}

#[async_trait]
impl ClusterManager for DefaultManager {
    /// Runs a single install phase per call.
    async fn create(&self) -> Result<bool> {
        self.clients
            .resources
            .create_or_update_group(self.resource_group(), &self.doc.cluster.location)
            .await?;

        self.installer.start_installation().await?;
        let remaining = self.installer.install_phase().await?;
        Ok(!remaining)
    }

    async fn update(&self) -> Result<()> {
        info!(key = %self.doc.key, "re-applying resources template");
        let graph = self.graphs.load(&self.doc.key).await?;
        let (template, parameters) = templates::resources(&self.doc, &graph)?;
        deploy_template(
            self.clients.deployments.as_ref(),
            DeployRetry {
                interval: self.config.deploy_retry_interval,
                timeout: self.config.deploy_retry_timeout,
            },
            &self.cancel,
            self.resource_group(),
            "resources",
            &template,
            &parameters,
        )
        .await
    }

    async fn delete(&self) -> Result<()> {
        info!(key = %self.doc.key, resource_group = self.resource_group(), "deleting resource group");
        match self.clients.resources.delete_group_and_wait(self.resource_group()).await {
            Ok(()) => {}
            Err(err) if is_not_found_error(&err) || is_resource_group_not_found_error(&err) => {
                info!(key = %self.doc.key, "resource group already gone");
            }
            Err(err) => return Err(err.into()),
        }

        self.graphs.delete_all(&self.doc.key).await
    }
}
