//! Stream event envelopes, decoded once at the event-log boundary.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};

use crate::error::DecodeError;
use crate::health::HealthState;
use crate::sink::{CollectorSpec, ExporterBackend, parse_config};

pub const SINKS_STREAM: &str = "orb.sinks";
pub const SINKER_STREAM: &str = "orb.sinker";
pub const DEADLETTER_STREAM: &str = "orb.maestro.deadletter";

pub const SINKS_CREATE: &str = "sinks.create";
pub const SINKS_UPDATE: &str = "sinks.update";
pub const SINKS_DELETE: &str = "sinks.delete";
pub const SINKER_ACTIVITY: &str = "sinker.activity";
pub const SINKER_IDLE: &str = "sinker.idle";
pub const SINKER_UPDATE: &str = "sinker.update";

/// Flat field/value map of one stream entry.
pub type EventFields = BTreeMap<String, String>;

fn required<'a>(fields: &'a EventFields, key: &'static str) -> Result<&'a str, DecodeError> {
    match fields.get(key).map(String::as_str) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(DecodeError::MissingField(key)),
    }
}

/// Producers disagree on `owner` vs `owner_id`.
fn owner(fields: &EventFields) -> Result<&str, DecodeError> {
    required(fields, "owner").or_else(|_| required(fields, "owner_id"))
}

/// RFC 3339 or Unix seconds; anything else is stamped with the decode time.
fn timestamp(fields: &EventFields) -> DateTime<Utc> {
    let Some(raw) = fields.get("timestamp") else {
        return Utc::now();
    };
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return ts.with_timezone(&Utc);
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .unwrap_or_else(Utc::now)
}

/// Create or update payload for one sink.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkChange {
    pub owner_id: String,
    pub spec: CollectorSpec,
    pub timestamp: DateTime<Utc>,
}

impl SinkChange {
    fn decode(fields: &EventFields) -> Result<Self, DecodeError> {
        let owner_id = owner(fields)?.to_string();
        let sink_id = required(fields, "sink_id")?;
        let backend = ExporterBackend::parse(fields.get("backend").map(String::as_str))?;
        let config = parse_config(required(fields, "config")?)?;
        Ok(Self {
            owner_id,
            spec: CollectorSpec::from_config(sink_id, backend, &config)?,
            timestamp: timestamp(fields),
        })
    }

    pub fn sink_id(&self) -> &str {
        &self.spec.sink_id
    }
}

/// Lifecycle events published on `orb.sinks`.
#[derive(Debug, Clone, PartialEq)]
pub enum SinksEvent {
    Create(SinkChange),
    Update(SinkChange),
    Delete { owner_id: String, sink_id: String },
}

impl SinksEvent {
    pub fn decode(fields: &EventFields) -> Result<Self, DecodeError> {
        match required(fields, "operation")? {
            SINKS_CREATE => Ok(SinksEvent::Create(SinkChange::decode(fields)?)),
            SINKS_UPDATE => Ok(SinksEvent::Update(SinkChange::decode(fields)?)),
            SINKS_DELETE => Ok(SinksEvent::Delete {
                owner_id: owner(fields)?.to_string(),
                sink_id: required(fields, "sink_id")?.to_string(),
            }),
            other => Err(DecodeError::UnknownOperation(other.to_string())),
        }
    }

    pub fn sink_id(&self) -> &str {
        match self {
            SinksEvent::Create(change) | SinksEvent::Update(change) => change.sink_id(),
            SinksEvent::Delete { sink_id, .. } => sink_id,
        }
    }

    pub fn owner_id(&self) -> &str {
        match self {
            SinksEvent::Create(change) | SinksEvent::Update(change) => &change.owner_id,
            SinksEvent::Delete { owner_id, .. } => owner_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkActivity {
    pub owner_id: String,
    pub sink_id: String,
    pub timestamp: DateTime<Utc>,
}

impl SinkActivity {
    fn decode(fields: &EventFields) -> Result<Self, DecodeError> {
        Ok(Self {
            owner_id: owner(fields)?.to_string(),
            sink_id: required(fields, "sink_id")?.to_string(),
            timestamp: timestamp(fields),
        })
    }
}

/// Health change published by the monitor on `orb.sinker`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkerUpdateEvent {
    pub owner_id: String,
    pub sink_id: String,
    pub state: HealthState,
    pub msg: String,
    pub timestamp: DateTime<Utc>,
}

impl SinkerUpdateEvent {
    pub fn new(owner_id: &str, sink_id: &str, state: HealthState, msg: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            sink_id: sink_id.to_string(),
            state,
            msg: msg.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn encode(&self) -> EventFields {
        BTreeMap::from([
            ("sink_id".to_string(), self.sink_id.clone()),
            ("owner".to_string(), self.owner_id.clone()),
            ("state".to_string(), self.state.to_string()),
            ("msg".to_string(), self.msg.clone()),
            ("timestamp".to_string(), self.timestamp.timestamp().to_string()),
            ("operation".to_string(), SINKER_UPDATE.to_string()),
        ])
    }

    fn decode(fields: &EventFields) -> Result<Self, DecodeError> {
        let raw_state = required(fields, "state")?;
        let state = raw_state
            .parse()
            .map_err(|_| DecodeError::InvalidState(raw_state.to_string()))?;
        Ok(Self {
            owner_id: owner(fields)?.to_string(),
            sink_id: required(fields, "sink_id")?.to_string(),
            state,
            msg: fields.get("msg").cloned().unwrap_or_default(),
            timestamp: timestamp(fields),
        })
    }
}

/// Everything that travels on `orb.sinker`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkerEvent {
    Activity(SinkActivity),
    Idle(SinkActivity),
    StateChanged(SinkerUpdateEvent),
}

impl SinkerEvent {
    pub fn decode(fields: &EventFields) -> Result<Self, DecodeError> {
        match required(fields, "operation")? {
            SINKER_ACTIVITY => Ok(SinkerEvent::Activity(SinkActivity::decode(fields)?)),
            SINKER_IDLE => Ok(SinkerEvent::Idle(SinkActivity::decode(fields)?)),
            SINKER_UPDATE => Ok(SinkerEvent::StateChanged(SinkerUpdateEvent::decode(fields)?)),
            other => Err(DecodeError::UnknownOperation(other.to_string())),
        }
    }
}
