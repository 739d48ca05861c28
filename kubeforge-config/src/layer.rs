use std::time::Duration;

use kubeforge_core::{BackendConfig, config::Secret};

/// One source's view of the configuration. `None` leaves the value from the
/// layers below untouched.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigLayer {
    pub lease_ttl: Option<Duration>,
    pub lease_renew_interval: Option<Duration>,
    pub max_dequeue_count: Option<u32>,
    pub workers: Option<usize>,
    pub idle_backoff: Option<Duration>,
    pub finalize_timeout: Option<Duration>,
    pub shutdown_timeout: Option<Duration>,
    pub poll_interval: Option<Duration>,
    pub condition_timeout: Option<Duration>,
    pub deploy_retry_timeout: Option<Duration>,
    pub deploy_retry_interval: Option<Duration>,
    pub graph_secret: Option<String>,
}

impl ConfigLayer {
    pub fn apply(&self, config: &mut BackendConfig) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *target = value.clone();
            }
        }

        set(&mut config.lease.ttl, &self.lease_ttl);
        set(&mut config.lease.renew_interval, &self.lease_renew_interval);
        set(&mut config.dispatch.max_dequeue_count, &self.max_dequeue_count);
        set(&mut config.dispatch.workers, &self.workers);
        set(&mut config.dispatch.idle_backoff, &self.idle_backoff);
        set(&mut config.dispatch.finalize_timeout, &self.finalize_timeout);
        set(&mut config.dispatch.shutdown_timeout, &self.shutdown_timeout);
        set(&mut config.installer.poll_interval, &self.poll_interval);
        set(&mut config.installer.condition_timeout, &self.condition_timeout);
        set(&mut config.installer.deploy_retry_timeout, &self.deploy_retry_timeout);
        set(&mut config.installer.deploy_retry_interval, &self.deploy_retry_interval);
        if let Some(secret) = &self.graph_secret {
            config.graph_secret = Secret::new(secret.clone());
        }
    }
}
