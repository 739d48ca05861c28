use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cloud_error::CloudErrorBody;
use crate::cluster::{Cluster, ProvisioningState};

/// Provisioning fields of a cluster that are safe to show to callers polling
/// an operation. Secrets and install bookkeeping are never copied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub name: String,
    pub location: String,
    pub provisioning_state: Option<ProvisioningState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_provisioning_state: Option<ProvisioningState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console_url: Option<String>,
}

impl ClusterSnapshot {
    pub fn redacted(cluster: &Cluster) -> Self {
        let props = &cluster.properties;
        Self {
            name: cluster.name.clone(),
            location: cluster.location.clone(),
            provisioning_state: props.provisioning_state,
            failed_provisioning_state: props.failed_provisioning_state,
            api_server_url: props.api_server_url.clone(),
            console_url: props.console_url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncOperation {
    pub id: String,
    pub initial_provisioning_state: ProvisioningState,
    pub provisioning_state: ProvisioningState,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CloudErrorBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<ClusterSnapshot>,
}

/// Externally visible status record. Outlives the cluster document so callers
/// can observe the result of a delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncOperationDocument {
    pub id: String,
    /// Key of the cluster document this operation was started for.
    pub cluster_key: String,
    #[serde(default)]
    pub etag: u64,
    pub async_operation: AsyncOperation,
}

impl AsyncOperationDocument {
    pub fn new(id: impl Into<String>, cluster_key: impl Into<String>, state: ProvisioningState) -> Self {
        let id = id.into();
        Self {
            async_operation: AsyncOperation {
                id: id.clone(),
                initial_provisioning_state: state,
                provisioning_state: state,
                start_time: Utc::now(),
                end_time: None,
                error: None,
                properties: None,
            },
            id,
            cluster_key: cluster_key.into(),
            etag: 0,
        }
    }
}
