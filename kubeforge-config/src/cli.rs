use std::{path::PathBuf, time::Duration};

use clap::Args;

use crate::layer::ConfigLayer;

/// Command-line configuration flags, flattened into the binary's CLI. Every
/// flag beats the same setting from the environment or the config file.
#[derive(Debug, Default, Clone, Args)]
pub struct ConfigArgs {
    /// TOML config file
    #[arg(long = "config", value_name = "PATH")]
    pub config_path: Option<PathBuf>,

    /// Dotenv file loaded before reading `KUBEFORGE_*` variables
    #[arg(long = "env-file", value_name = "PATH")]
    pub env_file: Option<PathBuf>,

    /// Number of dispatch workers
    #[arg(long)]
    pub workers: Option<usize>,

    /// Claims after which a document is failed without processing
    #[arg(long)]
    pub max_dequeue_count: Option<u32>,

    #[arg(long, value_parser = humantime::parse_duration)]
    pub lease_ttl: Option<Duration>,

    #[arg(long, value_parser = humantime::parse_duration)]
    pub lease_renew_interval: Option<Duration>,

    /// Sleep between empty dequeues
    #[arg(long, value_parser = humantime::parse_duration)]
    pub idle_backoff: Option<Duration>,

    /// Readiness poll interval
    #[arg(long, value_parser = humantime::parse_duration)]
    pub poll_interval: Option<Duration>,

    /// Deadline for each readiness condition
    #[arg(long, value_parser = humantime::parse_duration)]
    pub condition_timeout: Option<Duration>,
}

impl ConfigArgs {
    pub fn layer(&self) -> ConfigLayer {
        ConfigLayer {
            lease_ttl: self.lease_ttl,
            lease_renew_interval: self.lease_renew_interval,
            max_dequeue_count: self.max_dequeue_count,
            workers: self.workers,
            idle_backoff: self.idle_backoff,
            poll_interval: self.poll_interval,
            condition_timeout: self.condition_timeout,
            ..ConfigLayer::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        config: ConfigArgs,
    }

    #[test]
    fn flags_parse_into_a_layer() {
        let harness = Harness::try_parse_from([
            "kubeforge-backend",
            "--workers",
            "6",
            "--condition-timeout",
            "5m",
            "--config",
            "/etc/kubeforge.toml",
        ])
        .expect("parse");

        let layer = harness.config.layer();
        assert_eq!(layer.workers, Some(6));
        assert_eq!(layer.condition_timeout, Some(Duration::from_secs(300)));
        assert_eq!(layer.lease_ttl, None);
        assert_eq!(
            harness.config.config_path.as_deref(),
            Some(std::path::Path::new("/etc/kubeforge.toml"))
        );
    }

    #[test]
    fn bad_duration_flags_are_rejected() {
        assert!(Harness::try_parse_from(["kubeforge-backend", "--lease-ttl", "forever"]).is_err());
    }
}
