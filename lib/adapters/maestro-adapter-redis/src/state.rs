use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use maestro_domain::HealthState;
use maestro_ports::{SinkStatePort, SinkStatus};

const STATE_PREFIX: &str = "orb.maestro.sink_state";

pub fn state_key(owner_id: &str) -> String {
    format!("{STATE_PREFIX}:{owner_id}")
}

fn decode(raw: &str) -> Result<SinkStatus> {
    serde_json::from_str(raw).context("failed to decode sink status")
}

/// Sink status as JSON values in one hash per owner. Updates are
/// read-modify-write; the monitor and the activity listener touch
/// different fields and a lost update only delays a transition by a tick.
#[derive(Clone)]
pub struct RedisSinkStateStore {
    conn: ConnectionManager,
}

impl RedisSinkStateStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    async fn update(
        &self,
        owner_id: &str,
        sink_id: &str,
        f: impl FnOnce(&mut SinkStatus) + Send,
    ) -> Result<()> {
        let mut status = self.get(owner_id, sink_id).await?.unwrap_or_default();
        f(&mut status);
        let encoded = serde_json::to_string(&status).context("failed to encode sink status")?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset(state_key(owner_id), sink_id, encoded)
            .await
            .with_context(|| format!("failed to store status of sink {sink_id}"))?;
        Ok(())
    }
}

#[async_trait]
impl SinkStatePort for RedisSinkStateStore {
    async fn get(&self, owner_id: &str, sink_id: &str) -> Result<Option<SinkStatus>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .hget(state_key(owner_id), sink_id)
            .await
            .with_context(|| format!("failed to read status of sink {sink_id}"))?;
        raw.as_deref().map(decode).transpose()
    }

    async fn set_state(&self, owner_id: &str, sink_id: &str, state: HealthState) -> Result<()> {
        self.update(owner_id, sink_id, move |status| status.state = state)
            .await
    }

    async fn record_activity(
        &self,
        owner_id: &str,
        sink_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.update(owner_id, sink_id, move |status| {
            status.last_activity = Some(at)
        })
        .await
    }

    async fn clear_activity(&self, owner_id: &str, sink_id: &str) -> Result<()> {
        self.update(owner_id, sink_id, |status| status.last_activity = None)
            .await
    }

    async fn remove(&self, owner_id: &str, sink_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .hdel(state_key(owner_id), sink_id)
            .await
            .with_context(|| format!("failed to remove status of sink {sink_id}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_tolerates_missing_fields() {
        let status = decode(r#"{"state":"warning"}"#).unwrap();
        assert_eq!(status.state, HealthState::Warning);
        assert_eq!(status.last_activity, None);
        assert_eq!(decode("{}").unwrap(), SinkStatus::default());
    }

    #[test]
    fn test_key_is_owner_scoped() {
        assert_eq!(state_key("owner-1"), "orb.maestro.sink_state:owner-1");
    }
}
