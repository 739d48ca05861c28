//! Guard rails applied to the fully resolved configuration.

use std::time::Duration;

use kubeforge_core::BackendConfig;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigGuardRailError {
    #[error("dispatch.workers must be at least 1")]
    NoWorkers,

    #[error("lease.renew_interval ({renew:?}) must be shorter than lease.ttl ({ttl:?})")]
    RenewIntervalTooLong { renew: Duration, ttl: Duration },

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("graph encryption secret is empty; set KUBEFORGE_GRAPH_SECRET or graph_secret")]
    EmptyGraphSecret,
}

pub fn validate(config: &BackendConfig) -> Result<(), ConfigGuardRailError> {
    if config.dispatch.workers == 0 {
        return Err(ConfigGuardRailError::NoWorkers);
    }

    let durations = [
        ("lease.ttl", config.lease.ttl),
        ("lease.renew_interval", config.lease.renew_interval),
        ("dispatch.finalize_timeout", config.dispatch.finalize_timeout),
        ("installer.poll_interval", config.installer.poll_interval),
        ("installer.condition_timeout", config.installer.condition_timeout),
        ("installer.deploy_retry_interval", config.installer.deploy_retry_interval),
    ];
    if let Some((name, _)) = durations.into_iter().find(|(_, value)| value.is_zero()) {
        return Err(ConfigGuardRailError::ZeroDuration(name));
    }

    if config.lease.renew_interval >= config.lease.ttl {
        return Err(ConfigGuardRailError::RenewIntervalTooLong {
            renew: config.lease.renew_interval,
            ttl: config.lease.ttl,
        });
    }

    if config.graph_secret.expose().trim().is_empty() {
        return Err(ConfigGuardRailError::EmptyGraphSecret);
    }

    Ok(())
}
