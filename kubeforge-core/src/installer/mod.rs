//! Resumable, phase-by-phase cluster bring-up.
//!
//! The persisted [`InstallPhase`] is the only resume point. Each phase runs
//! its step table from the top, and the last step of every table commits
//! the next phase (or clears the install record) with the lease held. A
//! crash mid-phase therefore re-runs that phase; steps that create secrets
//! or the asset graph check for earlier output before generating anything.

pub mod deploy;
pub mod secrets;
pub mod steps;
pub mod templates;

use std::{fmt, sync::Arc, time::Duration};

use chrono::Utc;
use kubeforge_model::{ClusterDocument, Install, InstallPhase};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug_span, error, info, warn};

use crate::{
    classify::{UserErrorPipeline, is_not_found_error},
    cloud::CloudClients,
    config::InstallerConfig,
    error::{ClusterError, Result},
    graph::{
        Graph, GraphStore,
        assets::{BootstrapIgnition, InstallConfig},
    },
    store::ClusterStore,
};

pub use deploy::{DEPLOYMENT_NAME, DeployRetry, deploy_template};
pub use secrets::ClusterSecrets;
pub use steps::{Action, Condition, Step, phase_steps};

pub struct Installer {
    key: String,
    store: Arc<dyn ClusterStore>,
    clients: CloudClients,
    graphs: GraphStore,
    config: InstallerConfig,
    cancel: CancellationToken,
    classifier: Arc<UserErrorPipeline>,
    /// Graph resolved or loaded earlier in the current phase.
    graph: Mutex<Option<Graph>>,
}

impl fmt::Debug for Installer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Installer")
            .field("key", &self.key)
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Installer {
    pub fn new(
        key: impl Into<String>,
        store: Arc<dyn ClusterStore>,
        clients: CloudClients,
        graphs: GraphStore,
        config: InstallerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            key: key.into(),
            store,
            clients,
            graphs,
            config,
            cancel,
            classifier: Arc::new(UserErrorPipeline::default()),
            graph: Mutex::new(None),
        }
    }

    /// Classifier applied to the logs gathered after a failed step.
    pub fn with_classifier(mut self, classifier: Arc<UserErrorPipeline>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Run every remaining phase until the installation completes or a step
    /// fails.
    pub async fn install(&self) -> Result<()> {
        self.start_installation().await?;
        while self.install_phase().await? {}
        Ok(())
    }

    /// Stamp the install record on first entry. Later entries keep the
    /// original phase and timestamp.
    pub async fn start_installation(&self) -> Result<ClusterDocument> {
        let now = Utc::now();
        self.store
            .patch_with_lease(&self.key, &mut |doc: &mut ClusterDocument| {
                let props = &mut doc.cluster.properties;
                if props.install.is_none() {
                    props.install = Some(Install::new(now));
                }
                Ok(())
            })
            .await
    }

    /// Run the persisted phase. Returns whether another phase remains.
    pub async fn install_phase(&self) -> Result<bool> {
        let doc = self.store.get(&self.key).await?;
        let Some(install) = doc.cluster.properties.install else {
            return Ok(false);
        };

        let phase = install.phase;
        info!(key = %self.key, phase = %phase, "starting phase");
        *self.graph.lock().await = None;

        for step in phase_steps(phase, self.config.condition_timeout) {
            let span = debug_span!("step", step = step.name(), phase = %phase);
            if let Err(err) = self.run_step(step, phase).instrument(span).await {
                error!(key = %self.key, step = step.name(), error = %err, "step failed");
                let install_log = self.gather_failure_logs().await;
                return Err(ClusterError::Step {
                    step: step.name(),
                    source: Box::new(self.classify_failure(err, &install_log)),
                });
            }
        }

        let doc = self.store.get(&self.key).await?;
        Ok(doc.cluster.properties.install.is_some())
    }

    async fn run_step(&self, step: Step, phase: InstallPhase) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ClusterError::Cancelled(format!("before {}", step.name())));
        }

        match step {
            Step::Action(action) => {
                info!(step = action.name(), "running step");
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        Err(ClusterError::Cancelled(action.name().to_string()))
                    }
                    result = self.run_action(action, phase) => result,
                }
            }
            Step::Condition(condition, timeout) => self.wait_for(condition, timeout).await,
        }
    }

    async fn run_action(&self, action: Action, phase: InstallPhase) -> Result<()> {
        match action {
            Action::EnsureClusterSecrets => self.ensure_cluster_secrets().await,
            Action::ResolveGraph => self.resolve_graph().await,
            Action::DeployStorageTemplate => self.deploy_storage_template().await,
            Action::LoadGraph => self.load_graph().await,
            Action::DeployResourcesTemplate => self.deploy_resources_template().await,
            Action::RemoveBootstrapResources => self.remove_bootstrap_resources().await,
            Action::RemoveBootstrapIgnition => self.graphs.delete_bootstrap_ignition(&self.key).await,
            Action::AdvancePhase => self.advance_phase(phase).await,
            Action::FinishInstallation => self.finish_installation().await,
        }
    }

    /// Poll immediately, then every poll interval, until `condition` holds.
    async fn wait_for(&self, condition: Condition, timeout: Duration) -> Result<()> {
        info!(
            condition = condition.name(),
            timeout = %humantime::format_duration(timeout),
            "waiting for"
        );

        let poll = async {
            let mut ticker = tokio::time::interval(self.config.poll_interval);
            loop {
                ticker.tick().await;
                if self.check(condition).await? {
                    return Ok(());
                }
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                Err(ClusterError::Cancelled(format!("waiting for {}", condition.name())))
            }
            outcome = tokio::time::timeout(timeout, poll) => match outcome {
                Ok(result) => result,
                Err(_) => Err(ClusterError::Timeout {
                    what: condition.name().to_string(),
                    after: timeout,
                }),
            },
        }
    }

    async fn check(&self, condition: Condition) -> Result<bool> {
        let actions = &self.clients.actions;
        let ready = match condition {
            Condition::BootstrapConfigMapReady => actions.bootstrap_config_map_ready(&self.key).await,
            Condition::ApiServersReady => actions.api_servers_ready(&self.key).await,
            Condition::ClusterVersionReady => actions.cluster_version_ready(&self.key).await,
        };
        Ok(ready?)
    }

    async fn gather_failure_logs(&self) -> String {
        let lines = self.clients.actions.gather_failure_logs(&self.key).await;
        for line in &lines {
            warn!(key = %self.key, "{line}");
        }
        lines.join("\n")
    }

    /// An error that is already user-facing wins; otherwise a known failure
    /// signature in the install log replaces the opaque step error.
    fn classify_failure(&self, err: ClusterError, install_log: &str) -> ClusterError {
        if err.cloud_error().is_some() {
            return err;
        }
        match self.classifier.classify_install_log(install_log) {
            Some(cloud) => {
                info!(key = %self.key, code = %cloud.body.code, "install log matched a known failure");
                cloud.into()
            }
            None => err,
        }
    }

    async fn ensure_cluster_secrets(&self) -> Result<()> {
        let candidates = ClusterSecrets::generate();
        self.store
            .patch_with_lease(&self.key, &mut |doc: &mut ClusterDocument| {
                candidates.apply_missing(&mut doc.cluster.properties);
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn resolve_graph(&self) -> Result<()> {
        if self.graphs.exists(&self.key).await? {
            info!(key = %self.key, "graph already exists, skipping generation");
            let graph = self.graphs.load(&self.key).await?;
            *self.graph.lock().await = Some(graph);
            return Ok(());
        }

        let doc = self.store.get(&self.key).await?;
        let props = &doc.cluster.properties;
        let ssh_key = props
            .ssh_key
            .as_deref()
            .ok_or_else(|| ClusterError::Internal("cluster ssh key has not been generated".into()))?;
        let install = props
            .install
            .as_ref()
            .ok_or_else(|| ClusterError::Internal("installation has not been started".into()))?;

        let mut graph = Graph::new();
        graph.insert(InstallConfig {
            cluster_name: doc.cluster.name.clone(),
            domain: props.domain.clone(),
            location: doc.cluster.location.clone(),
            resource_group: props.resource_group.clone(),
            ssh_public_key: secrets::ssh_public_key(ssh_key)?,
            install_time: install.now,
        });
        graph.resolve(Box::new(BootstrapIgnition::default()))?;

        self.graphs.save(&self.key, &graph).await?;
        *self.graph.lock().await = Some(graph);
        Ok(())
    }

    async fn load_graph(&self) -> Result<()> {
        let graph = self.graphs.load(&self.key).await?;
        *self.graph.lock().await = Some(graph);
        Ok(())
    }

    fn deploy_retry(&self) -> DeployRetry {
        DeployRetry {
            interval: self.config.deploy_retry_interval,
            timeout: self.config.deploy_retry_timeout,
        }
    }

    async fn deploy_storage_template(&self) -> Result<()> {
        let doc = self.store.get(&self.key).await?;
        let (template, parameters) = templates::storage(&doc);
        deploy_template(
            self.clients.deployments.as_ref(),
            self.deploy_retry(),
            &self.cancel,
            &doc.cluster.properties.resource_group,
            "storage",
            &template,
            &parameters,
        )
        .await
    }

    async fn deploy_resources_template(&self) -> Result<()> {
        let doc = self.store.get(&self.key).await?;
        let (template, parameters) = {
            let graph = self.graph.lock().await;
            let graph = graph
                .as_ref()
                .ok_or_else(|| ClusterError::Internal("graph has not been loaded".into()))?;
            templates::resources(&doc, graph)?
        };
        deploy_template(
            self.clients.deployments.as_ref(),
            self.deploy_retry(),
            &self.cancel,
            &doc.cluster.properties.resource_group,
            "resources",
            &template,
            &parameters,
        )
        .await
    }

    async fn remove_bootstrap_resources(&self) -> Result<()> {
        let doc = self.store.get(&self.key).await?;
        let resource_group = &doc.cluster.properties.resource_group;
        for name in templates::BOOTSTRAP_RESOURCES {
            info!(resource = name, "removing bootstrap resource");
            match self.clients.resources.delete_resource(resource_group, name).await {
                Ok(()) => {}
                Err(err) if is_not_found_error(&err) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    async fn advance_phase(&self, phase: InstallPhase) -> Result<()> {
        let next = phase
            .next()
            .ok_or_else(|| ClusterError::Internal(format!("no phase follows {phase}")))?;
        self.store
            .patch_with_lease(&self.key, &mut |doc: &mut ClusterDocument| {
                match doc.cluster.properties.install.as_mut() {
                    Some(install) => {
                        install.phase = next;
                        Ok(())
                    }
                    None => Err(ClusterError::Internal("installation has not been started".into())),
                }
            })
            .await?;
        info!(key = %self.key, phase = %next, "install phase committed");
        Ok(())
    }

    async fn finish_installation(&self) -> Result<()> {
        self.store
            .patch_with_lease(&self.key, &mut |doc: &mut ClusterDocument| {
                let name = doc.cluster.name.clone();
                let props = &mut doc.cluster.properties;
                props.install = None;
                props.api_server_url = Some(format!("https://api.{name}.{}:6443/", props.domain));
                props.console_url = Some(format!("https://console.apps.{name}.{}/", props.domain));
                Ok(())
            })
            .await?;
        info!(key = %self.key, "installation finished");
        Ok(())
    }
}
