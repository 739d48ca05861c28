//! Runs kubeforge dispatch workers against in-process stores and a dry-run
//! cloud.

mod seed;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use kubeforge_config::{ConfigArgs, ConfigLoader};
use kubeforge_core::{
    BackendConfig,
    backend::{BackendRuntime, DefaultManagerFactory, Dispatcher},
    classify::UserErrorPipeline,
    cloud::DryRunCloud,
    config::Secret,
    graph::{AssetRegistry, GraphCipher, GraphStore},
    operation::AsyncOperationTracker,
    store::{
        BlobStore, CacacheBlobStore, ClusterStore, InMemoryAsyncOperationStore, InMemoryBlobStore,
        InMemoryClusterStore,
    },
    telemetry::TracingMetricsEmitter,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "kubeforge-backend")]
#[command(about = "Lease-based cluster lifecycle backend")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Log filter, overrides RUST_LOG
    #[arg(long, global = true, value_name = "FILTER")]
    log: Option<String>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run dispatch workers (default)
    Run,
    /// Resolve and validate configuration, then print it
    CheckConfig,
}

#[derive(ClapArgs, Debug, Clone)]
struct RunArgs {
    #[command(flatten)]
    config: ConfigArgs,

    /// JSON array of clusters to submit at startup
    #[arg(long, env = "KUBEFORGE_SEED", value_name = "PATH")]
    seed: Option<PathBuf>,

    /// Directory for the on-disk blob cache; blobs stay in memory when unset
    #[arg(long, env = "KUBEFORGE_BLOB_DIR", value_name = "PATH")]
    blob_dir: Option<PathBuf>,

    /// Simulated latency of every dry-run cloud call
    #[arg(long, default_value = "0s", value_parser = humantime::parse_duration)]
    cloud_latency: Duration,

    /// Polls before a dry-run readiness condition reports ready
    #[arg(long, default_value_t = 1)]
    polls_until_ready: u32,

    /// Shut down once every document reached a terminal state or was deleted
    #[arg(long)]
    exit_when_idle: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log.as_deref());

    let config = ConfigLoader::new(cli.run.config.clone())
        .load()
        .context("failed to load configuration")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(cli.run, config).await,
        Command::CheckConfig => check_config(config),
    }
}

fn init_tracing(filter: Option<&str>) {
    let filter = match filter {
        Some(filter) => tracing_subscriber::EnvFilter::new(filter),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "info,kubeforge_core=info".into()),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn check_config(mut config: BackendConfig) -> anyhow::Result<()> {
    config.graph_secret = Secret::new("<redacted>");
    let rendered = serde_json::to_string_pretty(&config).context("rendering configuration")?;
    println!("{rendered}");
    Ok(())
}

async fn run(args: RunArgs, config: BackendConfig) -> anyhow::Result<()> {
    let clusters = InMemoryClusterStore::new(config.lease.ttl);
    let operations = InMemoryAsyncOperationStore::new();
    let blobs: Arc<dyn BlobStore> = match &args.blob_dir {
        Some(dir) => {
            info!(path = %dir.display(), "using on-disk blob cache");
            Arc::new(open_blob_dir(dir)?)
        }
        None => Arc::new(InMemoryBlobStore::new()),
    };

    if let Some(path) = &args.seed {
        let requests = seed::read(path)?;
        let submitted = seed::submit(requests, &clusters, &operations).await?;
        info!(submitted, "seeded cluster requests");
    }

    let graphs = GraphStore::new(
        blobs,
        GraphCipher::from_secret(config.graph_secret.expose().as_bytes())
            .context("deriving graph encryption key")?,
        AssetRegistry::installer(),
    );
    let cloud = DryRunCloud::new(args.cloud_latency, args.polls_until_ready);
    let store: Arc<dyn ClusterStore> = Arc::new(clusters.clone());
    let classifier = Arc::new(UserErrorPipeline::default());

    let dispatcher = Dispatcher::new(
        Arc::clone(&store),
        AsyncOperationTracker::new(Arc::new(operations.clone()), Arc::clone(&classifier)),
        Arc::new(
            DefaultManagerFactory::new(store, cloud.clients(), graphs, config.installer)
                .with_classifier(classifier),
        ),
        Arc::new(TracingMetricsEmitter),
        config.lease,
        config.dispatch,
    );
    let runtime = BackendRuntime::new(Arc::new(dispatcher), config.dispatch);
    runtime.start().await;

    if args.exit_when_idle {
        tokio::select! {
            _ = wait_until_idle(&clusters, config.dispatch.idle_backoff) => {
                info!("all documents settled");
            }
            result = tokio::signal::ctrl_c() => {
                result.context("listening for ctrl-c")?;
                warn!("interrupted");
            }
        }
    } else {
        tokio::signal::ctrl_c()
            .await
            .context("listening for ctrl-c")?;
        info!("received ctrl-c");
    }

    runtime.shutdown().await;
    for doc in clusters.list().await {
        info!(
            key = %doc.key,
            state = ?doc.provisioning_state(),
            failed_state = ?doc.cluster.properties.failed_provisioning_state,
            "final document state"
        );
    }
    Ok(())
}

async fn wait_until_idle(clusters: &InMemoryClusterStore, every: Duration) {
    loop {
        let settled = clusters
            .list()
            .await
            .iter()
            .all(|doc| doc.provisioning_state().is_some_and(|state| state.is_terminal()));
        if settled {
            return;
        }
        tokio::time::sleep(every).await;
    }
}

/// Create the cache directory up front so a bad path fails at startup.
fn open_blob_dir(dir: &Path) -> anyhow::Result<CacacheBlobStore> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating blob cache directory {}", dir.display()))?;
    Ok(CacacheBlobStore::new(dir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_is_the_default_command() {
        let cli = Cli::try_parse_from([
            "kubeforge-backend",
            "--workers",
            "3",
            "--cloud-latency",
            "250ms",
            "--exit-when-idle",
        ])
        .expect("parse");

        assert!(cli.command.is_none());
        assert_eq!(cli.run.config.workers, Some(3));
        assert_eq!(cli.run.cloud_latency, Duration::from_millis(250));
        assert!(cli.run.exit_when_idle);
    }

    #[test]
    fn check_config_accepts_global_log_filter() {
        let cli = Cli::try_parse_from(["kubeforge-backend", "check-config", "--log", "debug"])
            .expect("parse");
        assert!(matches!(cli.command, Some(Command::CheckConfig)));
        assert_eq!(cli.log.as_deref(), Some("debug"));
    }

    #[tokio::test]
    async fn idle_wait_returns_when_everything_is_terminal() {
        let clusters = InMemoryClusterStore::new(Duration::from_secs(60));
        tokio::time::timeout(
            Duration::from_secs(1),
            wait_until_idle(&clusters, Duration::from_millis(10)),
        )
        .await
        .expect("empty store is idle");
    }
}
