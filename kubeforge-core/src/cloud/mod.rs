//! Boundary to cloud and Kubernetes APIs.
//!
//! Only the error shape and a handful of create/get/wait calls are part of the
//! engine. Real SDK wrappers implement these traits elsewhere; tests and the
//! dry-run binary provide their own.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub mod dry_run;

pub use dry_run::DryRunCloud;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target: String,
}

impl ServiceErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            target: String::new(),
        }
    }
}

/// Error body returned by the resource manager, possibly nested one level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<ServiceErrorDetail>,
}

impl ServiceError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_details(mut self, details: Vec<ServiceErrorDetail>) -> Self {
        self.details = details;
        self
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Code={:?} Message={:?}", self.code, self.message)?;
        if !self.details.is_empty() {
            let details = serde_json::to_string(&self.details).map_err(|_| fmt::Error)?;
            write!(f, " Details={details}")?;
        }
        Ok(())
    }
}

/// Any failure surfaced by a cloud or Kubernetes client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ProviderError {
    pub status_code: Option<u16>,
    pub service_error: Option<ServiceError>,
    pub message: String,
}

impl ProviderError {
    pub fn service(status_code: u16, service_error: ServiceError) -> Self {
        let message = format!("StatusCode={status_code} -- Original Error: {service_error}");
        Self {
            status_code: Some(status_code),
            service_error: Some(service_error),
            message,
        }
    }

    pub fn status(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code: Some(status_code),
            service_error: None,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self {
            status_code: None,
            service_error: None,
            message: message.into(),
        }
    }

    pub fn code(&self) -> Option<&str> {
        self.service_error.as_ref().map(|err| err.code.as_str())
    }
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Template deployments against a resource group.
#[async_trait]
pub trait DeploymentsClient: Send + Sync {
    async fn create_or_update_and_wait(
        &self,
        resource_group: &str,
        deployment: &str,
        template: &Value,
        parameters: &Value,
    ) -> ProviderResult<()>;

    /// Blocks until an already running deployment of the same name finishes.
    async fn wait(&self, resource_group: &str, deployment: &str) -> ProviderResult<()>;
}

#[async_trait]
pub trait ResourcesClient: Send + Sync {
    async fn create_or_update_group(&self, resource_group: &str, location: &str)
    -> ProviderResult<()>;

    async fn delete_group_and_wait(&self, resource_group: &str) -> ProviderResult<()>;

    async fn delete_resource(&self, resource_group: &str, name: &str) -> ProviderResult<()>;
}

/// Convergence signals and admin actions on the cluster being installed.
#[async_trait]
pub trait ClusterActions: Send + Sync {
    async fn bootstrap_config_map_ready(&self, key: &str) -> ProviderResult<bool>;

    async fn api_servers_ready(&self, key: &str) -> ProviderResult<bool>;

    async fn cluster_version_ready(&self, key: &str) -> ProviderResult<bool>;

    /// Best effort; returns whatever could be collected.
    async fn gather_failure_logs(&self, key: &str) -> Vec<String>;
}

/// Clients a manager needs for one cluster.
#[derive(Clone)]
pub struct CloudClients {
    pub deployments: Arc<dyn DeploymentsClient>,
    pub resources: Arc<dyn ResourcesClient>,
    pub actions: Arc<dyn ClusterActions>,
}

impl fmt::Debug for CloudClients {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudClients")
            .field("deployments", &"DeploymentsClient")
            .field("resources", &"ResourcesClient")
            .field("actions", &"ClusterActions")
            .finish()
    }
}
