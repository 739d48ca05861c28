use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ModelError, Result};

/// Lifecycle state of a cluster resource as seen by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProvisioningState {
    Creating,
    Updating,
    Deleting,
    Succeeded,
    Failed,
}

impl ProvisioningState {
    /// Succeeded and Failed end a dispatch cycle; everything else is work in flight.
    pub fn is_terminal(self) -> bool {
        matches!(self, ProvisioningState::Succeeded | ProvisioningState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProvisioningState::Creating => "Creating",
            ProvisioningState::Updating => "Updating",
            ProvisioningState::Deleting => "Deleting",
            ProvisioningState::Succeeded => "Succeeded",
            ProvisioningState::Failed => "Failed",
        }
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted install phase. Stored as its ordinal so older documents keep
/// decoding when phases gain names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum InstallPhase {
    DeployStorage = 0,
    DeployResources = 1,
    RemoveBootstrap = 2,
}

impl InstallPhase {
    pub const ALL: [InstallPhase; 3] = [
        InstallPhase::DeployStorage,
        InstallPhase::DeployResources,
        InstallPhase::RemoveBootstrap,
    ];

    /// Phase that follows this one, or `None` once bootstrap removal is done.
    pub fn next(self) -> Option<InstallPhase> {
        match self {
            InstallPhase::DeployStorage => Some(InstallPhase::DeployResources),
            InstallPhase::DeployResources => Some(InstallPhase::RemoveBootstrap),
            InstallPhase::RemoveBootstrap => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InstallPhase::DeployStorage => "DeployStorage",
            InstallPhase::DeployResources => "DeployResources",
            InstallPhase::RemoveBootstrap => "RemoveBootstrap",
        }
    }
}

impl TryFrom<u8> for InstallPhase {
    type Error = ModelError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(InstallPhase::DeployStorage),
            1 => Ok(InstallPhase::DeployResources),
            2 => Ok(InstallPhase::RemoveBootstrap),
            other => Err(ModelError::UnknownInstallPhase(other)),
        }
    }
}

impl From<InstallPhase> for u8 {
    fn from(phase: InstallPhase) -> Self {
        phase as u8
    }
}

impl fmt::Display for InstallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Present only while an installation is in progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Install {
    pub phase: InstallPhase,
    /// Wall clock captured when the installation started; assets derived from
    /// time (certificate validity, tokens) use this so retries agree.
    pub now: DateTime<Utc>,
}

impl Install {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            phase: InstallPhase::DeployStorage,
            now,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterProperties {
    pub provisioning_state: Option<ProvisioningState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_provisioning_state: Option<ProvisioningState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<Install>,
    /// Name of the resource group that holds every managed cloud resource.
    #[serde(default)]
    pub resource_group: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub storage_suffix: String,
    /// Base64 encoded private key. Never leaves the document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console_url: Option<String>,
}

impl ClusterProperties {
    pub fn state(&self) -> Option<ProvisioningState> {
        self.provisioning_state
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    /// Fully qualified resource identifier as submitted by the caller.
    pub id: String,
    pub name: String,
    pub location: String,
    #[serde(default)]
    pub properties: ClusterProperties,
}

/// Unit of work claimed by backend workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterDocument {
    pub id: Uuid,
    /// Lowercased resource identifier; doubles as the partition key.
    pub key: String,
    /// Optimistic concurrency token, owned by the store.
    #[serde(default)]
    pub etag: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_expires: Option<DateTime<Utc>>,
    #[serde(default)]
    pub dequeues: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub async_operation_id: Option<String>,
    pub cluster: Cluster,
}

impl ClusterDocument {
    pub fn new(cluster: Cluster) -> Self {
        Self {
            id: Uuid::now_v7(),
            key: cluster.id.to_lowercase(),
            etag: 0,
            lease_owner: None,
            lease_expires: None,
            dequeues: 0,
            async_operation_id: None,
            cluster,
        }
    }

    pub fn provisioning_state(&self) -> Option<ProvisioningState> {
        self.cluster.properties.provisioning_state
    }

    pub fn validate_key(&self) -> Result<()> {
        if self.key != self.key.to_lowercase() {
            return Err(ModelError::KeyNotLowercase(self.key.clone()));
        }
        Ok(())
    }

    /// True when `owner` holds a lease that has not yet expired at `now`.
    pub fn is_leased_by(&self, owner: &str, now: DateTime<Utc>) -> bool {
        self.lease_owner.as_deref() == Some(owner)
            && self.lease_expires.is_some_and(|expires| expires > now)
    }

    pub fn lease_available(&self, now: DateTime<Utc>) -> bool {
        self.lease_expires.is_none_or(|expires| expires <= now)
    }
}
