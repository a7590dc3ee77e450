use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use maestro_domain::DeploymentEntry;
use maestro_ports::DeploymentEntryPort;

const DEPLOYMENT_PREFIX: &str = "orb.maestro.deployment";

pub fn deployment_key(owner_id: &str) -> String {
    format!("{DEPLOYMENT_PREFIX}:{owner_id}")
}

/// Deployment entries as JSON values in one hash per owner.
#[derive(Clone)]
pub struct RedisEntryStore {
    conn: ConnectionManager,
}

impl RedisEntryStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl DeploymentEntryPort for RedisEntryStore {
    async fn get(&self, owner_id: &str, sink_id: &str) -> Result<Option<DeploymentEntry>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .hget(deployment_key(owner_id), sink_id)
            .await
            .with_context(|| format!("failed to read deployment entry for sink {sink_id}"))?;
        raw.as_deref().map(DeploymentEntry::from_json).transpose()
    }

    async fn put(&self, owner_id: &str, sink_id: &str, entry: &DeploymentEntry) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset(deployment_key(owner_id), sink_id, entry.to_json()?)
            .await
            .with_context(|| format!("failed to store deployment entry for sink {sink_id}"))?;
        Ok(())
    }

    async fn delete(&self, owner_id: &str, sink_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .hdel(deployment_key(owner_id), sink_id)
            .await
            .with_context(|| format!("failed to delete deployment entry for sink {sink_id}"))?;
        Ok(())
    }

    async fn exists(&self, owner_id: &str, sink_id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        conn.hexists(deployment_key(owner_id), sink_id)
            .await
            .with_context(|| format!("failed to check deployment entry for sink {sink_id}"))
    }
}
