//! Deployment descriptor builder.
//!
//! Renders the collector configuration for one sink and wraps it in the
//! Kubernetes manifest (ConfigMap + Deployment) applied to the cluster.
//! Everything here is pure: the same inputs always produce the same text.

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, PodSpec, PodTemplateSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use serde::Serialize;

use crate::sink::{CollectorSpec, ExporterBackend};

pub const DEFAULT_COLLECTOR_IMAGE: &str = "otel/opentelemetry-collector-contrib:0.91.0";

const KAFKA_PROTOCOL_VERSION: &str = "2.0.0";
const PPROF_ENDPOINT: &str = "0.0.0.0:1888";
const AUTHENTICATOR: &str = "basicauth/exporter";
const CONFIG_KEY: &str = "config.yaml";
const CONFIG_MOUNT: &str = "/etc/otelcol-contrib";

/// Cluster-wide inputs shared by every rendered manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestSettings {
    pub broker: String,
    pub image: String,
}

impl ManifestSettings {
    pub fn new(broker: impl Into<String>) -> Self {
        Self {
            broker: broker.into(),
            image: DEFAULT_COLLECTOR_IMAGE.to_string(),
        }
    }
}

pub fn deployment_name(sink_id: &str) -> String {
    format!("otel-{sink_id}")
}

pub fn config_map_name(sink_id: &str) -> String {
    format!("otel-collector-config-{sink_id}")
}

pub fn kafka_topic(sink_id: &str) -> String {
    format!("otlp_metrics-{sink_id}")
}

#[derive(Serialize)]
struct CollectorConfig {
    receivers: Receivers,
    extensions: Extensions,
    exporters: Exporters,
    service: Service,
}

#[derive(Serialize)]
struct Receivers {
    kafka: KafkaReceiver,
}

#[derive(Serialize)]
struct KafkaReceiver {
    brokers: Vec<String>,
    topic: String,
    protocol_version: &'static str,
}

#[derive(Serialize)]
struct Extensions {
    pprof: Pprof,
    #[serde(rename = "basicauth/exporter")]
    basic_auth: BasicAuth,
}

#[derive(Serialize)]
struct Pprof {
    endpoint: &'static str,
}

#[derive(Serialize)]
struct BasicAuth {
    client_auth: ClientAuth,
}

#[derive(Serialize)]
struct ClientAuth {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct Exporters {
    #[serde(rename = "prometheusremotewrite", skip_serializing_if = "Option::is_none")]
    prometheus: Option<RemoteExporter>,
    #[serde(rename = "otlphttp", skip_serializing_if = "Option::is_none")]
    otlp_http: Option<RemoteExporter>,
    logging: LoggingExporter,
}

#[derive(Serialize)]
struct RemoteExporter {
    endpoint: String,
    auth: ExporterAuth,
}

#[derive(Serialize)]
struct ExporterAuth {
    authenticator: &'static str,
}

#[derive(Serialize)]
struct LoggingExporter {
    verbosity: &'static str,
    sampling_initial: u32,
    sampling_thereafter: u32,
}

#[derive(Serialize)]
struct Service {
    extensions: Vec<&'static str>,
    pipelines: Pipelines,
}

#[derive(Serialize)]
struct Pipelines {
    metrics: Pipeline,
}

#[derive(Serialize)]
struct Pipeline {
    receivers: Vec<&'static str>,
    exporters: Vec<&'static str>,
}

fn validate(spec: &CollectorSpec, broker: &str) -> Result<()> {
    spec.validate()
        .with_context(|| format!("cannot render collector for sink {}", spec.sink_id))?;
    if broker.trim().is_empty() {
        bail!("message bus broker address must not be empty");
    }
    Ok(())
}

/// Renders the collector configuration YAML for one sink.
pub fn render_collector_config(spec: &CollectorSpec, broker: &str) -> Result<String> {
    validate(spec, broker)?;

    let exporter = RemoteExporter {
        endpoint: spec.endpoint.clone(),
        auth: ExporterAuth {
            authenticator: AUTHENTICATOR,
        },
    };
    let (prometheus, otlp_http) = match spec.backend {
        ExporterBackend::Prometheus => (Some(exporter), None),
        ExporterBackend::OtlpHttp => (None, Some(exporter)),
    };

    let config = CollectorConfig {
        receivers: Receivers {
            kafka: KafkaReceiver {
                brokers: vec![broker.to_string()],
                topic: kafka_topic(&spec.sink_id),
                protocol_version: KAFKA_PROTOCOL_VERSION,
            },
        },
        extensions: Extensions {
            pprof: Pprof {
                endpoint: PPROF_ENDPOINT,
            },
            basic_auth: BasicAuth {
                client_auth: ClientAuth {
                    username: spec.username.clone(),
                    password: spec.password.clone(),
                },
            },
        },
        exporters: Exporters {
            prometheus,
            otlp_http,
            logging: LoggingExporter {
                verbosity: "detailed",
                sampling_initial: 5,
                sampling_thereafter: 50,
            },
        },
        service: Service {
            extensions: vec!["pprof", AUTHENTICATOR],
            pipelines: Pipelines {
                metrics: Pipeline {
                    receivers: vec!["kafka"],
                    exporters: vec![spec.backend.exporter_name()],
                },
            },
        },
    };

    serde_yaml::to_string(&config).context("failed to serialize collector config")
}

fn labels(sink_id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), "opentelemetry".to_string()),
        ("component".to_string(), "otel-collector".to_string()),
        ("sink-id".to_string(), sink_id.to_string()),
    ])
}

/// Renders the full manifest: the ConfigMap holding the collector
/// configuration followed by the collector Deployment.
pub fn render(spec: &CollectorSpec, settings: &ManifestSettings) -> Result<String> {
    let collector_config = render_collector_config(spec, &settings.broker)?;
    let sink_id = spec.sink_id.as_str();

    let config_map = ConfigMap {
        metadata: ObjectMeta {
            name: Some(config_map_name(sink_id)),
            labels: Some(labels(sink_id)),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(CONFIG_KEY.to_string(), collector_config)])),
        ..Default::default()
    };

    let deployment = Deployment {
        metadata: ObjectMeta {
            name: Some(deployment_name(sink_id)),
            labels: Some(labels(sink_id)),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels(sink_id)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels(sink_id)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "otel-collector".to_string(),
                        image: Some(settings.image.clone()),
                        image_pull_policy: Some("IfNotPresent".to_string()),
                        args: Some(vec![format!("--config={CONFIG_MOUNT}/{CONFIG_KEY}")]),
                        volume_mounts: Some(vec![VolumeMount {
                            name: "collector-config".to_string(),
                            mount_path: CONFIG_MOUNT.to_string(),
                            read_only: Some(true),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    volumes: Some(vec![Volume {
                        name: "collector-config".to_string(),
                        config_map: Some(ConfigMapVolumeSource {
                            name: config_map_name(sink_id),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    };

    let mut manifest =
        serde_yaml::to_string(&config_map).context("failed to serialize collector configmap")?;
    manifest.push_str("---\n");
    manifest.push_str(
        &serde_yaml::to_string(&deployment).context("failed to serialize collector deployment")?,
    );
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_yaml::Value;

    fn spec() -> CollectorSpec {
        CollectorSpec {
            sink_id: "sink-id-222".into(),
            backend: ExporterBackend::Prometheus,
            endpoint: "https://mysinkurl:9922".into(),
            username: "1234123".into(),
            password: "CarnivorousVulgaris".into(),
        }
    }

    #[test]
    fn test_collector_config_contents() {
        let rendered = render_collector_config(&spec(), "kafka:9092").unwrap();
        let config: Value = serde_yaml::from_str(&rendered).unwrap();

        let kafka = &config["receivers"]["kafka"];
        assert_eq!(kafka["brokers"][0].as_str(), Some("kafka:9092"));
        assert_eq!(kafka["topic"].as_str(), Some("otlp_metrics-sink-id-222"));
        assert_eq!(kafka["protocol_version"].as_str(), Some("2.0.0"));

        let auth = &config["extensions"]["basicauth/exporter"]["client_auth"];
        assert_eq!(auth["username"].as_str(), Some("1234123"));
        assert_eq!(auth["password"].as_str(), Some("CarnivorousVulgaris"));
        assert_eq!(
            config["extensions"]["pprof"]["endpoint"].as_str(),
            Some("0.0.0.0:1888")
        );

        let exporter = &config["exporters"]["prometheusremotewrite"];
        assert_eq!(exporter["endpoint"].as_str(), Some("https://mysinkurl:9922"));
        assert_eq!(
            exporter["auth"]["authenticator"].as_str(),
            Some("basicauth/exporter")
        );
        assert_eq!(
            config["service"]["pipelines"]["metrics"]["exporters"][0].as_str(),
            Some("prometheusremotewrite")
        );
    }

    #[test]
    fn test_otlp_backend_swaps_exporter() {
        let mut spec = spec();
        spec.backend = ExporterBackend::OtlpHttp;
        let config: Value =
            serde_yaml::from_str(&render_collector_config(&spec, "kafka:9092").unwrap()).unwrap();

        assert!(config["exporters"].get("prometheusremotewrite").is_none());
        assert_eq!(
            config["exporters"]["otlphttp"]["endpoint"].as_str(),
            Some("https://mysinkurl:9922")
        );
        assert_eq!(
            config["service"]["pipelines"]["metrics"]["exporters"][0].as_str(),
            Some("otlphttp")
        );
    }

    #[test]
    fn test_credentials_are_not_spliced() {
        let mut spec = spec();
        spec.password = "p: [x]\n# not a comment".into();
        let rendered = render_collector_config(&spec, "kafka:9092").unwrap();
        let config: Value = serde_yaml::from_str(&rendered).unwrap();
        assert_eq!(
            config["extensions"]["basicauth/exporter"]["client_auth"]["password"].as_str(),
            Some("p: [x]\n# not a comment")
        );
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let settings = ManifestSettings::new("kafka:9092");
        assert_eq!(
            render(&spec(), &settings).unwrap(),
            render(&spec(), &settings).unwrap()
        );
    }

    #[test]
    fn test_manifest_documents() {
        let manifest = render(&spec(), &ManifestSettings::new("kafka:9092")).unwrap();
        let documents: Vec<&str> = manifest.split("---\n").collect();
        assert_eq!(documents.len(), 2);

        let config_map: ConfigMap = serde_yaml::from_str(documents[0]).unwrap();
        assert_eq!(
            config_map.metadata.name.as_deref(),
            Some("otel-collector-config-sink-id-222")
        );
        assert!(
            config_map
                .data
                .as_ref()
                .is_some_and(|data| data.contains_key("config.yaml"))
        );

        let deployment: Deployment = serde_yaml::from_str(documents[1]).unwrap();
        assert_eq!(deployment.metadata.name.as_deref(), Some("otel-sink-id-222"));
        let labels = deployment.metadata.labels.unwrap();
        assert_eq!(labels["app"], "opentelemetry");
        assert_eq!(labels["component"], "otel-collector");
        assert_eq!(labels["sink-id"], "sink-id-222");

        let pod = deployment.spec.unwrap().template.spec.unwrap();
        assert_eq!(
            pod.containers[0].image.as_deref(),
            Some(DEFAULT_COLLECTOR_IMAGE)
        );
    }

    #[test]
    fn test_validation_errors() {
        let settings = ManifestSettings::new("kafka:9092");

        let mut empty_id = spec();
        empty_id.sink_id.clear();
        assert!(render(&empty_id, &settings).is_err());

        let mut bad_url = spec();
        bad_url.endpoint = "not a url".into();
        assert!(render(&bad_url, &settings).is_err());

        let mut ftp = spec();
        ftp.endpoint = "ftp://host/path".into();
        assert!(render(&ftp, &settings).is_err());

        let mut no_user = spec();
        no_user.username.clear();
        assert!(render(&no_user, &settings).is_err());

        let mut no_password = spec();
        no_password.password.clear();
        assert!(render(&no_password, &settings).is_err());

        assert!(render(&spec(), &ManifestSettings::new("")).is_err());
    }
}
