use std::path::PathBuf;

use clap::Parser;

use maestro_domain::MaestroConfig;

/// Command line of the `maestro` binary. Every flag can also come from the
/// environment; set values override the config file.
#[derive(Debug, Parser)]
#[command(name = "maestro")]
#[command(about = "Deploys and monitors OpenTelemetry collectors for sinks", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "MAESTRO_CONFIG_PATH")]
    pub config: Option<PathBuf>,

    /// Redis holding the sink lifecycle stream
    #[arg(long, env = "MAESTRO_STREAM_ES_URL")]
    pub stream_es_url: Option<String>,

    /// Redis holding the sinker stream and deployment entries
    #[arg(long, env = "MAESTRO_SINKER_ES_URL")]
    pub sinker_es_url: Option<String>,

    /// Sinks service gRPC endpoint
    #[arg(long, env = "MAESTRO_SINKS_GRPC_URL")]
    pub sinks_grpc_url: Option<String>,

    /// Kafka broker the collectors read from
    #[arg(long, env = "MAESTRO_KAFKA_URL")]
    pub kafka_url: Option<String>,

    /// Namespace the collectors run in
    #[arg(long, env = "MAESTRO_NAMESPACE")]
    pub namespace: Option<String>,

    /// Log level, used when RUST_LOG is unset
    #[arg(long, env = "MAESTRO_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit JSON logs
    #[arg(long, env = "MAESTRO_LOG_JSON")]
    pub json: bool,
}

impl Cli {
    pub fn apply_overrides(&self, config: &mut MaestroConfig) {
        if let Some(url) = &self.stream_es_url {
            config.stream_es.url = url.clone();
        }
        if let Some(url) = &self.sinker_es_url {
            config.sinker_es.url = url.clone();
        }
        if let Some(url) = &self.sinks_grpc_url {
            config.sinks_grpc.url = url.clone();
        }
        if let Some(url) = &self.kafka_url {
            config.cluster.kafka_url = url.clone();
        }
        if let Some(namespace) = &self.namespace {
            config.cluster.namespace = namespace.clone();
        }
    }
}
