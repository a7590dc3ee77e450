use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use maestro_domain::EventFields;

/// One entry read from a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    pub fields: EventFields,
}

/// Identity of a consumer inside a consumer group on one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerGroup {
    pub stream: String,
    pub group: String,
    pub consumer: String,
}

impl ConsumerGroup {
    pub fn new(
        stream: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
    ) -> Self {
        Self {
            stream: stream.into(),
            group: group.into(),
            consumer: consumer.into(),
        }
    }
}

/// Where a group read starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadPosition {
    /// Entries already delivered to this consumer and not yet acknowledged,
    /// with an id greater than `after`.
    Pending { after: String },
    /// Entries never delivered to the group.
    New,
}

impl ReadPosition {
    pub fn pending() -> Self {
        ReadPosition::Pending {
            after: "0".to_string(),
        }
    }

    pub fn pending_after(id: &str) -> Self {
        ReadPosition::Pending {
            after: id.to_string(),
        }
    }
}

/// Durable append-only log with consumer groups.
#[async_trait]
pub trait EventLogPort: Send + Sync {
    /// Creates the group (and the stream) when missing. A group created here
    /// starts at the beginning of the stream.
    async fn ensure_group(&self, group: &ConsumerGroup) -> Result<()>;

    /// `block` only applies to `ReadPosition::New`; pending reads return
    /// immediately.
    async fn read_group(
        &self,
        group: &ConsumerGroup,
        position: &ReadPosition,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>>;

    async fn ack(&self, group: &ConsumerGroup, id: &str) -> Result<()>;

    async fn append(&self, stream: &str, fields: &EventFields) -> Result<String>;
}
