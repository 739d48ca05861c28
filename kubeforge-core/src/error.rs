use std::time::Duration;

use kubeforge_model::{CloudError, ModelError, ProvisioningState};
use thiserror::Error;

use crate::cloud::ProviderError;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Model(#[from] ModelError),

    /// Classified, user-visible error. Carried as-is to the async operation.
    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Document already exists: {0}")]
    AlreadyExists(String),

    #[error("lost lease on {0}")]
    LostLease(String),

    #[error("unexpected provisioningState {0:?}")]
    UnexpectedProvisioningState(Option<ProvisioningState>),

    #[error("unregistered type {0:?}")]
    UnregisteredAsset(String),

    #[error("cyclic asset dependency: {}", .0.join(" -> "))]
    CyclicDependency(Vec<&'static str>),

    #[error("asset {0} was not resolved")]
    MissingAsset(&'static str),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Blob storage error: {0}")]
    Blob(String),

    #[error("timed out waiting for {what} after {after:?}")]
    Timeout { what: String, after: Duration },

    #[error("{step}: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: Box<ClusterError>,
    },

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClusterError {
    /// Innermost classified cloud error, looking through step wrappers.
    pub fn cloud_error(&self) -> Option<&CloudError> {
        match self {
            ClusterError::Cloud(err) => Some(err),
            ClusterError::Step { source, .. } => source.cloud_error(),
            _ => None,
        }
    }

    /// Innermost provider error, looking through step wrappers.
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            ClusterError::Provider(err) => Some(err),
            ClusterError::Step { source, .. } => source.provider_error(),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            ClusterError::Cancelled(_) => true,
            ClusterError::Step { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClusterError>;
