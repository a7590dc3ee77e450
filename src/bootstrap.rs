use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use maestro_adapter_kube::KubeCluster;
use maestro_adapter_redis::{RedisEntryStore, RedisEventLog, RedisSinkStateStore};
use maestro_adapter_sinks::GrpcSinkRegistry;
use maestro_application::{MaestroPorts, MaestroService};
use maestro_domain::MaestroConfig;

use crate::cli::Cli;

pub fn init_tracing(cli: &Cli) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .context("invalid log level")?;
    let registry = tracing_subscriber::registry().with(filter);
    let installed = if cli.json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    installed.context("failed to install tracing subscriber")
}

/// `--config` / `MAESTRO_CONFIG_PATH`, then `~/.maestro/config.yaml`, then
/// `maestro-config.yaml` in the working directory.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    if let Ok(home) = env::var("HOME") {
        let path = Path::new(&home).join(".maestro").join("config.yaml");
        if path.exists() {
            return path;
        }
    }

    PathBuf::from("maestro-config.yaml")
}

/// An explicitly named file must exist; the fallbacks may be absent.
pub fn load_config(cli: &Cli) -> Result<MaestroConfig> {
    let path = config_path(cli.config.as_deref());
    let mut config = if cli.config.is_some() {
        MaestroConfig::load_from_path(&path)?
    } else {
        MaestroConfig::load_or_default(&path)?
    };
    cli.apply_overrides(&mut config);
    config.validate()?;
    tracing::info!(path = %path.display(), "configuration loaded");
    Ok(config)
}

/// Connects every adapter. Any failure here is fatal.
///
/// Each listener blocks in `XREADGROUP` on its own connection; entries,
/// sink state and published updates share a third one.
pub async fn connect(config: &MaestroConfig) -> Result<MaestroPorts> {
    let sinks_reader = maestro_adapter_redis::connect(&config.stream_es.url)
        .await
        .context("failed to connect to stream event store")?;
    let sinker_reader = maestro_adapter_redis::connect(&config.sinker_es.url)
        .await
        .context("failed to connect to sinker event store")?;
    let sinker_conn = maestro_adapter_redis::connect(&config.sinker_es.url)
        .await
        .context("failed to connect to sinker event store")?;
    let cluster = KubeCluster::connect(&config.cluster.namespace, &config.cluster.kubectl)
        .await
        .context("failed to create cluster client")?;
    let registry = GrpcSinkRegistry::connect(
        &config.sinks_grpc.url,
        Duration::from_secs(config.sinks_grpc.timeout_secs),
    )
    .await
    .context("failed to connect to sinks service")?;

    let max_len = config.consumer.max_stream_len;
    Ok(MaestroPorts {
        sinks_log: Arc::new(RedisEventLog::new(sinks_reader, max_len)),
        sinker_log: Arc::new(RedisEventLog::new(sinker_reader, max_len)),
        updates_log: Arc::new(RedisEventLog::new(sinker_conn.clone(), max_len)),
        entries: Arc::new(RedisEntryStore::new(sinker_conn.clone())),
        states: Arc::new(RedisSinkStateStore::new(sinker_conn)),
        cluster: Arc::new(cluster),
        registry: Arc::new(registry),
    })
}

pub async fn build(cli: &Cli) -> Result<MaestroService> {
    let config = load_config(cli)?;
    let ports = connect(&config).await?;
    Ok(MaestroService::new(ports, config))
}
