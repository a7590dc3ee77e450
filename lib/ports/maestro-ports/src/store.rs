use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use maestro_domain::{DeploymentEntry, HealthState};

/// Per-owner store of rendered deployment entries, keyed by sink id.
#[async_trait]
pub trait DeploymentEntryPort: Send + Sync {
    async fn get(&self, owner_id: &str, sink_id: &str) -> Result<Option<DeploymentEntry>>;
    async fn put(&self, owner_id: &str, sink_id: &str, entry: &DeploymentEntry) -> Result<()>;
    async fn delete(&self, owner_id: &str, sink_id: &str) -> Result<()>;
    async fn exists(&self, owner_id: &str, sink_id: &str) -> Result<bool>;
}

/// Last published health and last observed activity of a sink.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkStatus {
    #[serde(default)]
    pub state: HealthState,
    #[serde(default)]
    pub last_activity: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait SinkStatePort: Send + Sync {
    async fn get(&self, owner_id: &str, sink_id: &str) -> Result<Option<SinkStatus>>;
    async fn set_state(&self, owner_id: &str, sink_id: &str, state: HealthState) -> Result<()>;
    async fn record_activity(&self, owner_id: &str, sink_id: &str, at: DateTime<Utc>)
    -> Result<()>;
    async fn clear_activity(&self, owner_id: &str, sink_id: &str) -> Result<()>;
    async fn remove(&self, owner_id: &str, sink_id: &str) -> Result<()>;
}
