use anyhow::Result;
use async_trait::async_trait;

use maestro_domain::SinkRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkFilter {
    pub otel_enabled: String,
}

impl SinkFilter {
    pub fn otel_enabled() -> Self {
        Self {
            otel_enabled: "enabled".to_string(),
        }
    }
}

/// Read-only view of the sinks service.
#[async_trait]
pub trait SinkRegistryPort: Send + Sync {
    async fn retrieve_sinks(&self, filter: &SinkFilter) -> Result<Vec<SinkRecord>>;
}
