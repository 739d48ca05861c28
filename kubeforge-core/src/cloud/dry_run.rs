//! A cloud that provisions nothing. Every call is logged and succeeds after
//! an optional simulated latency; readiness conditions turn true after a
//! configured number of polls.

use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::info;

use super::{
    CloudClients, ClusterActions, DeploymentsClient, ProviderError, ProviderResult,
    ResourcesClient,
};

#[derive(Default)]
struct State {
    groups: BTreeSet<String>,
    deployments: Vec<(String, String)>,
    polls: HashMap<(String, &'static str), u32>,
}

pub struct DryRunCloud {
    latency: Duration,
    polls_until_ready: u32,
    state: Mutex<State>,
}

impl fmt::Debug for DryRunCloud {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DryRunCloud")
            .field("latency", &self.latency)
            .field("polls_until_ready", &self.polls_until_ready)
            .finish_non_exhaustive()
    }
}

impl DryRunCloud {
    pub fn new(latency: Duration, polls_until_ready: u32) -> Arc<Self> {
        Arc::new(Self {
            latency,
            polls_until_ready,
            state: Mutex::new(State::default()),
        })
    }

    pub fn clients(self: &Arc<Self>) -> CloudClients {
        CloudClients {
            deployments: Arc::clone(self) as Arc<dyn DeploymentsClient>,
            resources: Arc::clone(self) as Arc<dyn ResourcesClient>,
            actions: Arc::clone(self) as Arc<dyn ClusterActions>,
        }
    }

    pub async fn resource_groups(&self) -> Vec<String> {
        self.state.lock().await.groups.iter().cloned().collect()
    }

    /// `(resource group, deployment name)` for every template submitted.
    pub async fn deployments(&self) -> Vec<(String, String)> {
        self.state.lock().await.deployments.clone()
    }

    async fn pause(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    async fn poll(&self, key: &str, condition: &'static str) -> bool {
        self.pause().await;
        let mut state = self.state.lock().await;
        let polls = state.polls.entry((key.to_string(), condition)).or_default();
        *polls += 1;
        let ready = *polls > self.polls_until_ready;
        info!(key, condition, polls = *polls, ready, "dry-run poll");
        ready
    }
}

#[async_trait]
impl DeploymentsClient for DryRunCloud {
    async fn create_or_update_and_wait(
        &self,
        resource_group: &str,
        deployment: &str,
        _: &Value,
        parameters: &Value,
    ) -> ProviderResult<()> {
        self.pause().await;
        let mut state = self.state.lock().await;
        if !state.groups.contains(resource_group) {
            return Err(ProviderError::status(
                404,
                format!("resource group '{resource_group}' could not be found"),
            ));
        }
        let parameter_names: Vec<&str> = parameters
            .as_object()
            .map(|params| params.keys().map(String::as_str).collect())
            .unwrap_or_default();
        info!(resource_group, deployment, ?parameter_names, "dry-run deployment");
        state
            .deployments
            .push((resource_group.to_string(), deployment.to_string()));
        Ok(())
    }

    async fn wait(&self, _: &str, _: &str) -> ProviderResult<()> {
        self.pause().await;
        Ok(())
    }
}

#[async_trait]
impl ResourcesClient for DryRunCloud {
    async fn create_or_update_group(
        &self,
        resource_group: &str,
        location: &str,
    ) -> ProviderResult<()> {
        self.pause().await;
        info!(resource_group, location, "dry-run resource group");
        self.state
            .lock()
            .await
            .groups
            .insert(resource_group.to_string());
        Ok(())
    }

    async fn delete_group_and_wait(&self, resource_group: &str) -> ProviderResult<()> {
        self.pause().await;
        if self.state.lock().await.groups.remove(resource_group) {
            info!(resource_group, "dry-run resource group deleted");
            Ok(())
        } else {
            Err(ProviderError::status(
                404,
                format!("resource group '{resource_group}' could not be found"),
            ))
        }
    }

    async fn delete_resource(&self, resource_group: &str, name: &str) -> ProviderResult<()> {
        self.pause().await;
        info!(resource_group, name, "dry-run resource deleted");
        Ok(())
    }
}

#[async_trait]
impl ClusterActions for DryRunCloud {
    async fn bootstrap_config_map_ready(&self, key: &str) -> ProviderResult<bool> {
        Ok(self.poll(key, "bootstrap_config_map_ready").await)
    }

    async fn api_servers_ready(&self, key: &str) -> ProviderResult<bool> {
        Ok(self.poll(key, "api_servers_ready").await)
    }

    async fn cluster_version_ready(&self, key: &str) -> ProviderResult<bool> {
        Ok(self.poll(key, "cluster_version_ready").await)
    }

    async fn gather_failure_logs(&self, _: &str) -> Vec<String> {
        Vec::new()
    }
}
