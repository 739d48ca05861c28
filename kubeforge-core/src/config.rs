use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

/// Everything the backend needs to run, with defaults that match production.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub lease: LeaseConfig,
    pub dispatch: DispatchConfig,
    pub installer: InstallerConfig,
    /// Source secret the graph encryption key is derived from.
    pub graph_secret: Secret,
}

/// Lease/heartbeat tuning for dispatch workers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// Must be comfortably below `ttl` or the lease lapses between renewals.
    #[serde(with = "humantime_serde")]
    pub renew_interval: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            renew_interval: Duration::from_secs(10),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Documents claimed more often than this are failed without running.
    pub max_dequeue_count: u32,
    pub workers: usize,
    /// Sleep between empty dequeues.
    #[serde(with = "humantime_serde")]
    pub idle_backoff: Duration,
    /// Budget for the lease release and async operation writes that close a
    /// cycle, independent of the cycle's own cancellation.
    #[serde(with = "humantime_serde")]
    pub finalize_timeout: Duration,
    /// How long shutdown waits for workers to drain.
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_dequeue_count: 5,
            workers: 2,
            idle_backoff: Duration::from_secs(1),
            finalize_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub condition_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub deploy_retry_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub deploy_retry_interval: Duration,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            condition_timeout: Duration::from_secs(30 * 60),
            deploy_retry_timeout: Duration::from_secs(10 * 60),
            deploy_retry_interval: Duration::from_secs(10),
        }
    }
}

/// String that never shows up in logs or debug output.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("Secret(<empty>)")
        } else {
            f.write_str("Secret(<redacted>)")
        }
    }
}

/// Durations as humantime strings such as `"10s"` or `"30m"`.
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_production_timings() {
        let config = BackendConfig::default();
        assert_eq!(config.lease.ttl, Duration::from_secs(60));
        assert_eq!(config.lease.renew_interval, Duration::from_secs(10));
        assert_eq!(config.dispatch.max_dequeue_count, 5);
        assert_eq!(config.installer.condition_timeout, Duration::from_secs(1800));
        assert_eq!(config.installer.deploy_retry_timeout, Duration::from_secs(600));
    }

    #[test]
    fn durations_use_humantime_strings() {
        let raw = serde_json::json!({
            "lease": { "ttl": "2m" },
            "installer": { "poll_interval": "500ms" },
        });
        let config: BackendConfig = serde_json::from_value(raw).expect("parse config");
        assert_eq!(config.lease.ttl, Duration::from_secs(120));
        assert_eq!(config.lease.renew_interval, Duration::from_secs(10));
        assert_eq!(config.installer.poll_interval, Duration::from_millis(500));

        let value = serde_json::to_value(&config).expect("serialize");
        assert_eq!(value["lease"]["ttl"], "2m");
    }

    #[test]
    fn secret_is_redacted_in_debug() {
        let config = BackendConfig {
            graph_secret: Secret::new("hunter2"),
            ..BackendConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
