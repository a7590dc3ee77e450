use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tonic::transport::{Channel, Endpoint};

use maestro_domain::SinkRecord;
use maestro_ports::{SinkFilter, SinkRegistryPort};

use crate::pb::sink_service_client::SinkServiceClient;
use crate::pb::{SinkRes, SinksFilterReq};

#[derive(Debug, Clone)]
pub struct GrpcSinkRegistry {
    client: SinkServiceClient<Channel>,
}

impl GrpcSinkRegistry {
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        let channel = Endpoint::from_shared(url.to_string())
            .with_context(|| format!("invalid sinks service url {url}"))?
            .timeout(timeout)
            .connect()
            .await
            .with_context(|| format!("failed to connect to sinks service at {url}"))?;
        tracing::info!(url, "connected to sinks service");
        Ok(Self {
            client: SinkServiceClient::new(channel),
        })
    }
}

/// Undecodable config bytes become an empty object; the sink then fails
/// collector decoding where it is used instead of hiding the whole listing.
fn sink_record(sink: SinkRes) -> SinkRecord {
    let config = if sink.config.is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_slice(&sink.config).unwrap_or_else(|err| {
            tracing::warn!(sink_id = %sink.id, "sink config is not valid JSON: {}", err);
            Value::Object(Default::default())
        })
    };
    SinkRecord {
        id: sink.id,
        owner_id: sink.owner_id,
        backend: sink.backend,
        state: sink.state,
        config,
    }
}

#[async_trait]
impl SinkRegistryPort for GrpcSinkRegistry {
    async fn retrieve_sinks(&self, filter: &SinkFilter) -> Result<Vec<SinkRecord>> {
        let mut client = self.client.clone();
        let response = client
            .retrieve_sinks(SinksFilterReq {
                otel_enabled: filter.otel_enabled.clone(),
            })
            .await
            .context("failed to retrieve sinks")?;
        Ok(response
            .into_inner()
            .sinks
            .into_iter()
            .map(sink_record)
            .collect())
    }
}
