use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::error::DecodeError;
use crate::health::HealthState;

/// Remote-write flavour of a sink; decides which exporter the collector runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExporterBackend {
    #[default]
    Prometheus,
    OtlpHttp,
}

impl ExporterBackend {
    /// An absent or empty backend means prometheus, the only backend older
    /// producers knew about.
    pub fn parse(raw: Option<&str>) -> Result<Self, DecodeError> {
        match raw.map(str::trim).unwrap_or_default() {
            "" | "prometheus" => Ok(ExporterBackend::Prometheus),
            "otlphttp" => Ok(ExporterBackend::OtlpHttp),
            other => Err(DecodeError::UnknownBackend(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExporterBackend::Prometheus => "prometheus",
            ExporterBackend::OtlpHttp => "otlphttp",
        }
    }

    pub fn exporter_name(&self) -> &'static str {
        match self {
            ExporterBackend::Prometheus => "prometheusremotewrite",
            ExporterBackend::OtlpHttp => "otlphttp",
        }
    }

    fn endpoint_key(&self) -> &'static str {
        match self {
            ExporterBackend::Prometheus => "remote_host",
            ExporterBackend::OtlpHttp => "endpoint",
        }
    }
}

/// Everything needed to render one sink's collector.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorSpec {
    pub sink_id: String,
    pub backend: ExporterBackend,
    pub endpoint: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for CollectorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectorSpec")
            .field("sink_id", &self.sink_id)
            .field("backend", &self.backend)
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

const FLAT_ENDPOINT_KEYS: [&str; 3] = ["remote_host", "sink_url", "endpoint"];

impl CollectorSpec {
    /// Reads a sink config blob.
    ///
    /// Accepts the structured shape (`exporter` / `authentication`
    /// sub-objects) and the older flat shape (`remote_host` or `sink_url`,
    /// `username`, `password` at the top level).
    pub fn from_config(
        sink_id: &str,
        backend: ExporterBackend,
        config: &Value,
    ) -> Result<Self, DecodeError> {
        if sink_id.is_empty() {
            return Err(DecodeError::MissingField("sink_id"));
        }
        let object = config
            .as_object()
            .ok_or_else(|| DecodeError::InvalidConfig("config is not a JSON object".into()))?;

        let endpoint = object
            .get("exporter")
            .and_then(|exporter| exporter.get(backend.endpoint_key()))
            .and_then(Value::as_str)
            .or_else(|| {
                FLAT_ENDPOINT_KEYS
                    .iter()
                    .find_map(|key| object.get(*key).and_then(Value::as_str))
            })
            .ok_or(DecodeError::MissingField(backend.endpoint_key()))?;

        let authentication = object.get("authentication");
        if let Some(kind) = authentication
            .and_then(|auth| auth.get("type"))
            .and_then(Value::as_str)
        {
            if kind != "basicauth" {
                return Err(DecodeError::InvalidConfig(format!(
                    "unsupported authentication type `{kind}`"
                )));
            }
        }
        let credential = |key: &'static str| {
            authentication
                .and_then(|auth| auth.get(key))
                .or_else(|| object.get(key))
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or(DecodeError::MissingField(key))
        };

        let spec = Self {
            sink_id: sink_id.to_string(),
            backend,
            endpoint: endpoint.to_string(),
            username: credential("username")?,
            password: credential("password")?,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// A spec that passes this always renders, so nothing that decodes can
    /// fail later for the same reason.
    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.sink_id.trim().is_empty() {
            return Err(DecodeError::MissingField("sink_id"));
        }
        let endpoint = Url::parse(&self.endpoint).map_err(|err| {
            DecodeError::InvalidConfig(format!("invalid endpoint url `{}`: {err}", self.endpoint))
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(DecodeError::InvalidConfig(format!(
                "endpoint must be http or https, got `{}`",
                endpoint.scheme()
            )));
        }
        if self.username.is_empty() {
            return Err(DecodeError::MissingField("username"));
        }
        if self.password.is_empty() {
            return Err(DecodeError::MissingField("password"));
        }
        Ok(())
    }
}

/// Parses the JSON-encoded `config` field carried by stream events.
pub fn parse_config(raw: &str) -> Result<Value, DecodeError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|err| DecodeError::InvalidConfig(err.to_string()))?;
    if !value.is_object() {
        return Err(DecodeError::InvalidConfig(
            "config is not a JSON object".into(),
        ));
    }
    Ok(value)
}

/// A sink as reported by the sink registry.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkRecord {
    pub id: String,
    pub owner_id: String,
    pub backend: String,
    pub state: String,
    pub config: Value,
}

impl SinkRecord {
    pub fn health(&self) -> HealthState {
        HealthState::from_str_lossy(&self.state)
    }

    pub fn collector_spec(&self) -> Result<CollectorSpec, DecodeError> {
        let backend = ExporterBackend::parse(Some(&self.backend))?;
        CollectorSpec::from_config(&self.id, backend, &self.config)
    }

    /// Last time the metrics pipeline wrote to this sink, when the registry
    /// tracks it. Both RFC 3339 strings and Unix seconds are understood.
    pub fn last_remote_write(&self) -> Option<DateTime<Utc>> {
        match self.config.get("last_remote_write")? {
            Value::String(raw) => DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|ts| ts.with_timezone(&Utc)),
            Value::Number(secs) => secs
                .as_i64()
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_structured_config() {
        let config = json!({
            "exporter": {"remote_host": "https://prom.example.com/api/v1/write"},
            "authentication": {"type": "basicauth", "username": "u", "password": "p"},
            "opentelemetry": "enabled"
        });
        let spec =
            CollectorSpec::from_config("sink-1", ExporterBackend::Prometheus, &config).unwrap();
        assert_eq!(spec.endpoint, "https://prom.example.com/api/v1/write");
        assert_eq!(spec.username, "u");
        assert_eq!(spec.password, "p");
    }

    #[test]
    fn test_flat_config() {
        let config = json!({"remote_host": "https://x", "username": "u", "password": "p"});
        let spec =
            CollectorSpec::from_config("sink-1", ExporterBackend::Prometheus, &config).unwrap();
        assert_eq!(spec.endpoint, "https://x");

        let legacy = json!({"sink_url": "https://y", "username": "u", "password": "p"});
        let spec =
            CollectorSpec::from_config("sink-1", ExporterBackend::Prometheus, &legacy).unwrap();
        assert_eq!(spec.endpoint, "https://y");
    }

    #[test]
    fn test_otlp_reads_endpoint() {
        let config = json!({
            "exporter": {"endpoint": "https://otlp.example.com"},
            "authentication": {"type": "basicauth", "username": "u", "password": "p"}
        });
        let spec = CollectorSpec::from_config("sink-1", ExporterBackend::OtlpHttp, &config).unwrap();
        assert_eq!(spec.endpoint, "https://otlp.example.com");
    }

    #[test]
    fn test_missing_password_is_reported() {
        let config = json!({"remote_host": "https://x", "username": "u"});
        let err = CollectorSpec::from_config("sink-1", ExporterBackend::Prometheus, &config)
            .unwrap_err();
        assert_eq!(err, DecodeError::MissingField("password"));
    }

    #[test]
    fn test_unrenderable_config_fails_to_decode() {
        let decode = |config: Value| {
            CollectorSpec::from_config("sink-1", ExporterBackend::Prometheus, &config)
        };

        assert!(matches!(
            decode(json!({"remote_host": "ftp://x", "username": "u", "password": "p"})),
            Err(DecodeError::InvalidConfig(_))
        ));
        assert!(matches!(
            decode(json!({"remote_host": "not a url", "username": "u", "password": "p"})),
            Err(DecodeError::InvalidConfig(_))
        ));
        assert!(matches!(
            decode(json!({"remote_host": "", "username": "u", "password": "p"})),
            Err(DecodeError::InvalidConfig(_))
        ));
        assert_eq!(
            decode(json!({"remote_host": "https://x", "username": "u", "password": ""})),
            Err(DecodeError::MissingField("password"))
        );
        assert_eq!(
            decode(json!({"remote_host": "https://x", "username": "", "password": "p"})),
            Err(DecodeError::MissingField("username"))
        );
    }

    #[test]
    fn test_rejects_unknown_auth_type() {
        let config = json!({
            "remote_host": "https://x",
            "authentication": {"type": "bearer", "username": "u", "password": "p"}
        });
        assert!(matches!(
            CollectorSpec::from_config("sink-1", ExporterBackend::Prometheus, &config),
            Err(DecodeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = json!({"remote_host": "https://x", "username": "u", "password": "hunter2"});
        let spec =
            CollectorSpec::from_config("sink-1", ExporterBackend::Prometheus, &config).unwrap();
        assert!(!format!("{spec:?}").contains("hunter2"));
    }

    #[test]
    fn test_parse_config_rejects_non_objects() {
        assert!(parse_config("[1,2]").is_err());
        assert!(parse_config("{not json").is_err());
        assert!(parse_config("{}").is_ok());
    }

    #[test]
    fn test_last_remote_write() {
        let record = SinkRecord {
            id: "sink-1".into(),
            owner_id: "owner".into(),
            backend: "prometheus".into(),
            state: "active".into(),
            config: json!({"last_remote_write": "2024-05-01T10:00:00Z"}),
        };
        assert_eq!(
            record.last_remote_write(),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap())
        );
        assert_eq!(record.health(), HealthState::Active);
    }
}
