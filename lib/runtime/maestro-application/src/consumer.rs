use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

use maestro_domain::events::DEADLETTER_STREAM;
use maestro_domain::{ConsumerConfig, DecodeError, EventFields};
use maestro_ports::{ConsumerGroup, EventLogPort, ReadPosition, StreamEntry};

const READ_ERROR_BACKOFF: std::time::Duration = std::time::Duration::from_secs(1);

/// Decodes and handles the entries of one stream.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    type Event: Send;

    fn name(&self) -> &'static str;

    fn decode(&self, fields: &EventFields) -> Result<Self::Event, DecodeError>;

    /// Events with the same key are handled in log order: while one is left
    /// pending, later ones with that key wait behind it.
    fn ordering_key(&self, _event: &Self::Event) -> Option<String> {
        None
    }

    /// An error leaves the entry pending so it is delivered again.
    async fn handle(&self, event: Self::Event) -> Result<()>;
}

/// What happened to one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Handled,
    DeadLettered,
    Pending,
    /// Not handled because an earlier entry with the same key is pending.
    Deferred,
}

/// Consumer-group loop for one stream. Entries are handled one at a time in
/// log order; pending entries are re-driven periodically.
pub struct StreamConsumer<H> {
    log: Arc<dyn EventLogPort>,
    group: ConsumerGroup,
    settings: ConsumerConfig,
    handler: H,
    /// Ordering keys with an entry left pending.
    blocked: Mutex<HashSet<String>>,
}

impl<H: StreamHandler> StreamConsumer<H> {
    pub fn new(
        log: Arc<dyn EventLogPort>,
        group: ConsumerGroup,
        settings: ConsumerConfig,
        handler: H,
    ) -> Self {
        Self {
            log,
            group,
            settings,
            handler,
            blocked: Mutex::new(HashSet::new()),
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        self.log.ensure_group(&self.group).await?;
        tracing::info!(
            listener = self.handler.name(),
            stream = %self.group.stream,
            group = %self.group.group,
            "listener started"
        );

        self.drain_pending(&token).await;
        let mut last_drain = Instant::now();

        while !token.is_cancelled() {
            if last_drain.elapsed() >= self.settings.pending_retry_interval() {
                self.drain_pending(&token).await;
                last_drain = Instant::now();
            }

            let read = tokio::select! {
                _ = token.cancelled() => break,
                read = self.log.read_group(
                    &self.group,
                    &ReadPosition::New,
                    self.settings.batch_size,
                    self.settings.block(),
                ) => read,
            };

            match read {
                Ok(entries) => {
                    for entry in entries {
                        if token.is_cancelled() {
                            break;
                        }
                        self.process(entry).await;
                    }
                }
                Err(e) => {
                    tracing::error!(listener = self.handler.name(), "failed to read stream: {:#}", e);
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = sleep(READ_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        tracing::info!(listener = self.handler.name(), "listener stopped");
        Ok(())
    }

    /// Re-handles every entry this consumer holds without an ack, oldest
    /// first, and recomputes which ordering keys are still blocked.
    pub async fn drain_pending(&self, token: &CancellationToken) {
        let mut blocked = self.blocked.lock().await;
        let mut still_blocked = HashSet::new();
        let mut position = ReadPosition::pending();
        loop {
            let entries = match self
                .log
                .read_group(
                    &self.group,
                    &position,
                    self.settings.batch_size,
                    std::time::Duration::ZERO,
                )
                .await
            {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::error!(
                        listener = self.handler.name(),
                        "failed to read pending entries: {:#}",
                        e
                    );
                    return;
                }
            };
            let Some(last) = entries.last() else {
                *blocked = still_blocked;
                return;
            };
            position = ReadPosition::pending_after(&last.id);
            for entry in entries {
                if token.is_cancelled() {
                    return;
                }
                self.process_ordered(entry, &mut still_blocked).await;
            }
        }
    }

    pub async fn process(&self, entry: StreamEntry) -> Disposition {
        let mut blocked = self.blocked.lock().await;
        self.process_ordered(entry, &mut blocked).await
    }

    async fn process_ordered(
        &self,
        entry: StreamEntry,
        blocked: &mut HashSet<String>,
    ) -> Disposition {
        let event = match self.handler.decode(&entry.fields) {
            Ok(event) => event,
            Err(reason) => return self.dead_letter(&entry, &reason).await,
        };

        let key = self.handler.ordering_key(&event);
        if let Some(key) = &key {
            if blocked.contains(key) {
                tracing::debug!(
                    listener = self.handler.name(),
                    entry = %entry.id,
                    %key,
                    "earlier event still pending, deferring"
                );
                return Disposition::Deferred;
            }
        }

        if let Err(e) = self.handler.handle(event).await {
            tracing::error!(
                listener = self.handler.name(),
                entry = %entry.id,
                "failed to handle event, leaving it pending: {:#}",
                e
            );
            if let Some(key) = key {
                blocked.insert(key);
            }
            return Disposition::Pending;
        }
        self.ack(&entry.id).await;
        Disposition::Handled
    }

    async fn dead_letter(&self, entry: &StreamEntry, reason: &DecodeError) -> Disposition {
        tracing::warn!(
            listener = self.handler.name(),
            entry = %entry.id,
            "undecodable event moved to dead letters: {}",
            reason
        );
        let mut fields = entry.fields.clone();
        fields.insert("source_stream".to_string(), self.group.stream.clone());
        fields.insert("source_id".to_string(), entry.id.clone());
        fields.insert("reason".to_string(), reason.to_string());
        if let Err(e) = self.log.append(DEADLETTER_STREAM, &fields).await {
            tracing::error!(entry = %entry.id, "failed to write dead letter: {:#}", e);
            return Disposition::Pending;
        }
        self.ack(&entry.id).await;
        Disposition::DeadLettered
    }

    async fn ack(&self, id: &str) {
        if let Err(e) = self.log.ack(&self.group, id).await {
            tracing::error!(entry = %id, "failed to ack event: {:#}", e);
        }
    }
}
