//! Redis adapters: stream consumer groups for the event log and per-owner
//! hashes for deployment entries and sink state.

pub mod entries;
pub mod state;
pub mod streams;

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;

pub use entries::RedisEntryStore;
pub use state::RedisSinkStateStore;
pub use streams::RedisEventLog;

/// Opens a managed (auto-reconnecting) connection and checks it answers.
pub async fn connect(url: &str) -> Result<ConnectionManager> {
    let client = redis::Client::open(url).with_context(|| format!("invalid redis url {url}"))?;
    let mut conn = client
        .get_connection_manager()
        .await
        .with_context(|| format!("failed to connect to redis at {url}"))?;
    let _: String = redis::cmd("PING")
        .query_async(&mut conn)
        .await
        .with_context(|| format!("redis at {url} did not answer PING"))?;
    Ok(conn)
}
