use std::{str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{layer::ConfigLayer, loader::ConfigLoadError};

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub lease: FileLeaseConfig,
    #[serde(default)]
    pub dispatch: FileDispatchConfig,
    #[serde(default)]
    pub installer: FileInstallerConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_secret: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileLeaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renew_interval: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileDispatchConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_dequeue_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_backoff: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finalize_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shutdown_timeout: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileInstallerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deploy_retry_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deploy_retry_interval: Option<String>,
}

fn duration(field: &'static str, raw: Option<&String>) -> Result<Option<Duration>, ConfigLoadError> {
    raw.map(|raw| {
        humantime::parse_duration(raw.trim()).map_err(|err| ConfigLoadError::InvalidValue {
            field,
            value: raw.clone(),
            reason: err.to_string(),
        })
    })
    .transpose()
}

impl FileConfig {
    pub fn parse(raw: &str) -> Result<Self, ConfigLoadError> {
        toml::from_str(raw).map_err(|err| ConfigLoadError::Toml(Box::new(err)))
    }

    pub fn into_layer(self) -> Result<ConfigLayer, ConfigLoadError> {
        Ok(ConfigLayer {
            lease_ttl: duration("lease.ttl", self.lease.ttl.as_ref())?,
            lease_renew_interval: duration(
                "lease.renew_interval",
                self.lease.renew_interval.as_ref(),
            )?,
            max_dequeue_count: self.dispatch.max_dequeue_count,
            workers: self.dispatch.workers,
            idle_backoff: duration("dispatch.idle_backoff", self.dispatch.idle_backoff.as_ref())?,
            finalize_timeout: duration(
                "dispatch.finalize_timeout",
                self.dispatch.finalize_timeout.as_ref(),
            )?,
            shutdown_timeout: duration(
                "dispatch.shutdown_timeout",
                self.dispatch.shutdown_timeout.as_ref(),
            )?,
            poll_interval: duration(
                "installer.poll_interval",
                self.installer.poll_interval.as_ref(),
            )?,
            condition_timeout: duration(
                "installer.condition_timeout",
                self.installer.condition_timeout.as_ref(),
            )?,
            deploy_retry_timeout: duration(
                "installer.deploy_retry_timeout",
                self.installer.deploy_retry_timeout.as_ref(),
            )?,
            deploy_retry_interval: duration(
                "installer.deploy_retry_interval",
                self.installer.deploy_retry_interval.as_ref(),
            )?,
            graph_secret: self.graph_secret,
        })
    }
}

pub const ENV_CONFIG_PATH: &str = "KUBEFORGE_CONFIG";
pub const ENV_LEASE_TTL: &str = "KUBEFORGE_LEASE_TTL";
pub const ENV_LEASE_RENEW_INTERVAL: &str = "KUBEFORGE_LEASE_RENEW_INTERVAL";
pub const ENV_MAX_DEQUEUE_COUNT: &str = "KUBEFORGE_MAX_DEQUEUE_COUNT";
pub const ENV_WORKERS: &str = "KUBEFORGE_WORKERS";
pub const ENV_IDLE_BACKOFF: &str = "KUBEFORGE_IDLE_BACKOFF";
pub const ENV_FINALIZE_TIMEOUT: &str = "KUBEFORGE_FINALIZE_TIMEOUT";
pub const ENV_SHUTDOWN_TIMEOUT: &str = "KUBEFORGE_SHUTDOWN_TIMEOUT";
pub const ENV_POLL_INTERVAL: &str = "KUBEFORGE_POLL_INTERVAL";
pub const ENV_CONDITION_TIMEOUT: &str = "KUBEFORGE_CONDITION_TIMEOUT";
pub const ENV_DEPLOY_RETRY_TIMEOUT: &str = "KUBEFORGE_DEPLOY_RETRY_TIMEOUT";
pub const ENV_DEPLOY_RETRY_INTERVAL: &str = "KUBEFORGE_DEPLOY_RETRY_INTERVAL";
pub const ENV_GRAPH_SECRET: &str = "KUBEFORGE_GRAPH_SECRET";

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EnvConfig {
    layer: ConfigLayer,
}

impl EnvConfig {
    pub fn gather() -> Result<Self, ConfigLoadError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read every `KUBEFORGE_*` key through `lookup`. Blank values count as
    /// unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigLoadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let duration = |name: &'static str| {
            var(name)
                .map(|raw| {
                    humantime::parse_duration(raw.trim()).map_err(|err| {
                        ConfigLoadError::InvalidValue {
                            field: name,
                            value: raw.clone(),
                            reason: err.to_string(),
                        }
                    })
                })
                .transpose()
        };

        Ok(Self {
            layer: ConfigLayer {
                lease_ttl: duration(ENV_LEASE_TTL)?,
                lease_renew_interval: duration(ENV_LEASE_RENEW_INTERVAL)?,
                max_dequeue_count: parse_var(ENV_MAX_DEQUEUE_COUNT, var(ENV_MAX_DEQUEUE_COUNT))?,
                workers: parse_var(ENV_WORKERS, var(ENV_WORKERS))?,
                idle_backoff: duration(ENV_IDLE_BACKOFF)?,
                finalize_timeout: duration(ENV_FINALIZE_TIMEOUT)?,
                shutdown_timeout: duration(ENV_SHUTDOWN_TIMEOUT)?,
                poll_interval: duration(ENV_POLL_INTERVAL)?,
                condition_timeout: duration(ENV_CONDITION_TIMEOUT)?,
                deploy_retry_timeout: duration(ENV_DEPLOY_RETRY_TIMEOUT)?,
                deploy_retry_interval: duration(ENV_DEPLOY_RETRY_INTERVAL)?,
                graph_secret: var(ENV_GRAPH_SECRET),
            },
        })
    }

    pub fn layer(&self) -> &ConfigLayer {
        &self.layer
    }
}

fn parse_var<T>(name: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigLoadError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.map(|raw| {
        raw.trim().parse().map_err(|err: T::Err| ConfigLoadError::InvalidValue {
            field: name,
            value: raw.clone(),
            reason: err.to_string(),
        })
    })
    .transpose()
}
