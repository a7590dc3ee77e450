use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use redis::streams::{StreamId, StreamMaxlen, StreamReadOptions, StreamReadReply};

use maestro_domain::EventFields;
use maestro_ports::{ConsumerGroup, EventLogPort, ReadPosition, StreamEntry};

const BUSYGROUP: &str = "BUSYGROUP";

/// Event log over Redis streams and consumer groups.
///
/// A blocking read holds its connection until it returns, and the
/// multiplexed connection queues every other command behind it. Give each
/// blocking reader a connection of its own.
#[derive(Clone)]
pub struct RedisEventLog {
    conn: ConnectionManager,
    max_len: usize,
}

impl RedisEventLog {
    pub fn new(conn: ConnectionManager, max_len: usize) -> Self {
        Self { conn, max_len }
    }
}

fn stream_entry(raw: &StreamId) -> StreamEntry {
    let fields = raw
        .map
        .iter()
        .filter_map(|(key, value)| {
            redis::from_redis_value::<String>(value)
                .ok()
                .map(|value| (key.clone(), value))
        })
        .collect();
    StreamEntry {
        id: raw.id.clone(),
        fields,
    }
}

fn entries(reply: Option<StreamReadReply>) -> Vec<StreamEntry> {
    reply
        .map(|reply| {
            reply
                .keys
                .iter()
                .flat_map(|key| key.ids.iter().map(stream_entry))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl EventLogPort for RedisEventLog {
    async fn ensure_group(&self, group: &ConsumerGroup) -> Result<()> {
        let mut conn = self.conn.clone();
        let created: redis::RedisResult<()> = conn
            .xgroup_create_mkstream(&group.stream, &group.group, "0")
            .await;
        match created {
            Ok(()) => {
                tracing::info!(stream = %group.stream, group = %group.group, "created consumer group");
                Ok(())
            }
            Err(err) if err.code() == Some(BUSYGROUP) => Ok(()),
            Err(err) => Err(err).with_context(|| {
                format!(
                    "failed to create consumer group {} on {}",
                    group.group, group.stream
                )
            }),
        }
    }

    async fn read_group(
        &self,
        group: &ConsumerGroup,
        position: &ReadPosition,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>> {
        let mut conn = self.conn.clone();
        let mut options = StreamReadOptions::default()
            .group(&group.group, &group.consumer)
            .count(count);
        let id = match position {
            ReadPosition::Pending { after } => after.as_str(),
            ReadPosition::New => {
                if !block.is_zero() {
                    options = options.block(block.as_millis() as usize);
                }
                ">"
            }
        };
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&group.stream], &[id], &options)
            .await
            .with_context(|| format!("failed to read {} as {}", group.stream, group.group))?;
        Ok(entries(reply))
    }

    async fn ack(&self, group: &ConsumerGroup, id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .xack(&group.stream, &group.group, &[id])
            .await
            .with_context(|| format!("failed to ack {id} on {}", group.stream))?;
        Ok(())
    }

    async fn append(&self, stream: &str, fields: &EventFields) -> Result<String> {
        let mut conn = self.conn.clone();
        let items: Vec<(&str, &str)> = fields
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .collect();
        conn.xadd_maxlen(stream, StreamMaxlen::Approx(self.max_len), "*", &items)
            .await
            .with_context(|| format!("failed to append to {stream}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis::Value;
    use redis::streams::StreamKey;
    use std::collections::HashMap;

    #[test]
    fn test_reply_is_flattened_in_order() {
        let id = |id: &str, op: &str| StreamId {
            id: id.to_string(),
            map: HashMap::from([(
                "operation".to_string(),
                Value::BulkString(op.as_bytes().to_vec()),
            )]),
        };
        let reply = StreamReadReply {
            keys: vec![StreamKey {
                key: "orb.sinks".to_string(),
                ids: vec![id("1-0", "sinks.create"), id("2-0", "sinks.delete")],
            }],
        };

        let flattened = entries(Some(reply));
        assert_eq!(flattened.len(), 2);
        assert_eq!(flattened[0].id, "1-0");
        assert_eq!(flattened[1].fields["operation"], "sinks.delete");
    }

    #[test]
    fn test_timed_out_read_is_empty() {
        assert!(entries(None).is_empty());
    }

    #[test]
    fn test_nil_fields_are_dropped() {
        let raw = StreamId {
            id: "3-0".to_string(),
            map: HashMap::from([("config".to_string(), Value::Nil)]),
        };
        assert!(stream_entry(&raw).fields.is_empty());
    }
}
