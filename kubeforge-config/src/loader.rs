use std::path::{Path, PathBuf};

use anyhow::Context;
use kubeforge_core::BackendConfig;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    cli::ConfigArgs,
    layer::ConfigLayer,
    sources::{ENV_CONFIG_PATH, EnvConfig, FileConfig},
    validation::{ConfigGuardRailError, validate},
};

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Toml(Box<toml::de::Error>),

    #[error("invalid value {value:?} for {field}: {reason}")]
    InvalidValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    GuardRail(#[from] ConfigGuardRailError),
}

/// Resolves the effective [`BackendConfig`] from every configuration source.
#[derive(Debug, Default, Clone)]
pub struct ConfigLoader {
    args: ConfigArgs,
}

impl ConfigLoader {
    pub fn new(args: ConfigArgs) -> Self {
        Self { args }
    }

    /// Load `.env`, then resolve defaults < file < environment < flags and
    /// validate the result.
    pub fn load(&self) -> anyhow::Result<BackendConfig> {
        self.load_dotenv()?;
        let env = EnvConfig::gather().context("reading KUBEFORGE_* environment")?;

        let path = self
            .args
            .config_path
            .clone()
            .or_else(|| std::env::var_os(ENV_CONFIG_PATH).map(PathBuf::from));
        let file = match path {
            Some(path) => Some(
                read_file(&path)
                    .with_context(|| format!("loading config file {}", path.display()))?,
            ),
            None => None,
        };

        let config = resolve(file, env.layer(), &self.args.layer())?;
        info!(
            workers = config.dispatch.workers,
            lease_ttl = ?config.lease.ttl,
            "configuration loaded"
        );
        Ok(config)
    }

    fn load_dotenv(&self) -> anyhow::Result<()> {
        match &self.args.env_file {
            Some(path) => {
                dotenvy::from_path(path)
                    .with_context(|| format!("loading env file {}", path.display()))?;
            }
            None => match dotenvy::dotenv() {
                Ok(path) => debug!(path = %path.display(), "loaded .env"),
                Err(err) if err.not_found() => {}
                Err(err) => return Err(err).context("loading .env"),
            },
        }
        Ok(())
    }
}

pub fn read_file(path: &Path) -> Result<ConfigLayer, ConfigLoadError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    FileConfig::parse(&raw)?.into_layer()
}

/// Apply layers over the defaults in precedence order and validate.
pub fn resolve(
    file: Option<ConfigLayer>,
    env: &ConfigLayer,
    cli: &ConfigLayer,
) -> Result<BackendConfig, ConfigLoadError> {
    let mut config = BackendConfig::default();
    if let Some(file) = file {
        file.apply(&mut config);
    }
    env.apply(&mut config);
    cli.apply(&mut config);
    validate(&config)?;
    Ok(config)
}
