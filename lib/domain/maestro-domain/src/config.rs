use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::manifest::{DEFAULT_COLLECTOR_IMAGE, ManifestSettings};

/// Service configuration, read from YAML.
///
/// Every section has defaults so a partial file (or no file at all) is
/// enough to run against a local stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaestroConfig {
    pub stream_es: RedisConfig,
    pub sinker_es: RedisConfig,
    pub consumer: ConsumerConfig,
    pub sinks_grpc: GrpcConfig,
    pub cluster: ClusterConfig,
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

impl RedisConfig {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
        }
    }
}

impl Default for MaestroConfig {
    fn default() -> Self {
        Self {
            stream_es: RedisConfig::new("redis://localhost:6379/0"),
            sinker_es: RedisConfig::new("redis://localhost:6378/1"),
            consumer: ConsumerConfig::default(),
            sinks_grpc: GrpcConfig::default(),
            cluster: ClusterConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub group: String,
    pub name: String,
    pub batch_size: usize,
    pub block_ms: u64,
    pub pending_retry_secs: u64,
    pub max_stream_len: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group: "orb.maestro".to_string(),
            name: "orb_maestro-es-consumer".to_string(),
            batch_size: 16,
            block_ms: 5_000,
            pending_retry_secs: 30,
            max_stream_len: 1_000,
        }
    }
}

impl ConsumerConfig {
    pub fn block(&self) -> Duration {
        Duration::from_millis(self.block_ms)
    }

    pub fn pending_retry_interval(&self) -> Duration {
        Duration::from_secs(self.pending_retry_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrpcConfig {
    pub url: String,
    pub timeout_secs: u64,
}

impl Default for GrpcConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8282".to_string(),
            timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub namespace: String,
    pub kubectl: String,
    pub collector_image: String,
    pub kafka_url: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            namespace: "otelcollectors".to_string(),
            kubectl: "kubectl".to_string(),
            collector_image: DEFAULT_COLLECTOR_IMAGE.to_string(),
            kafka_url: "localhost:9092".to_string(),
        }
    }
}

impl ClusterConfig {
    pub fn manifest_settings(&self) -> ManifestSettings {
        ManifestSettings {
            broker: self.kafka_url.clone(),
            image: self.collector_image.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_secs: u64,
    pub idle_threshold_secs: u64,
    pub log_tail_lines: i64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            idle_threshold_secs: 300,
            log_tail_lines: 10,
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_secs)
    }
}

impl MaestroConfig {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Like `load_from_path`, but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from_path(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.consumer.group.trim().is_empty() {
            bail!("consumer.group must not be empty");
        }
        if self.consumer.name.trim().is_empty() {
            bail!("consumer.name must not be empty");
        }
        if self.cluster.namespace.trim().is_empty() {
            bail!("cluster.namespace must not be empty");
        }
        if self.monitor.interval_secs == 0 {
            bail!("monitor.interval_secs must be positive");
        }
        if self.monitor.log_tail_lines <= 0 {
            bail!("monitor.log_tail_lines must be positive");
        }
        Ok(())
    }
}
