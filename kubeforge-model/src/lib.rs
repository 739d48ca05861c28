//! Core data model definitions shared across kubeforge crates.
#![allow(missing_docs)]

pub mod async_operation;
pub mod cloud_error;
pub mod cluster;
pub mod error;

pub use async_operation::{AsyncOperation, AsyncOperationDocument, ClusterSnapshot};
pub use cloud_error::{CloudError, CloudErrorBody, CloudErrorCode};
pub use cluster::{
    Cluster, ClusterDocument, ClusterProperties, Install, InstallPhase, ProvisioningState,
};
pub use error::{ModelError, Result};
