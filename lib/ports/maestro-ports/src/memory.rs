//! In-memory port implementations for tests and local runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use maestro_domain::{DeploymentEntry, EventFields, HealthState};

use crate::event_log::{ConsumerGroup, EventLogPort, ReadPosition, StreamEntry};
use crate::store::{DeploymentEntryPort, SinkStatePort, SinkStatus};

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

#[derive(Default)]
struct GroupState {
    next_index: usize,
    /// entry index -> consumer holding it
    pending: BTreeMap<usize, String>,
}

#[derive(Default)]
struct StreamState {
    entries: Vec<StreamEntry>,
    next_seq: u64,
    groups: HashMap<String, GroupState>,
}

impl StreamState {
    fn index_of(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.id == id)
    }
}

/// Ids are `<seq>-0` with `seq` starting at 1, so entry index is `seq - 1`.
fn first_index_after(id: &str) -> usize {
    id.split('-')
        .next()
        .and_then(|seq| seq.parse::<usize>().ok())
        .unwrap_or_default()
}

/// Event log with Redis-stream consumer-group semantics: entries delivered
/// to a consumer stay pending until acknowledged.
#[derive(Clone, Default)]
pub struct InMemoryEventLog {
    streams: Arc<Mutex<HashMap<String, StreamState>>>,
    appended: Arc<Notify>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every entry ever appended to `stream`, oldest first.
    pub fn entries(&self, stream: &str) -> Vec<EventFields> {
        if let Ok(guard) = self.streams.lock() {
            guard
                .get(stream)
                .map(|state| state.entries.iter().map(|e| e.fields.clone()).collect())
                .unwrap_or_default()
        } else {
            Vec::new()
        }
    }

    pub fn pending_count(&self, stream: &str, group: &str) -> usize {
        if let Ok(guard) = self.streams.lock() {
            guard
                .get(stream)
                .and_then(|state| state.groups.get(group))
                .map(|group| group.pending.len())
                .unwrap_or_default()
        } else {
            0
        }
    }

    fn take(
        &self,
        group: &ConsumerGroup,
        position: &ReadPosition,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let mut guard = lock(&self.streams)?;
        let Some(stream) = guard.get_mut(&group.stream) else {
            bail!("NOGROUP no such stream {}", group.stream);
        };
        let StreamState {
            entries, groups, ..
        } = stream;
        let Some(state) = groups.get_mut(&group.group) else {
            bail!("NOGROUP no such group {} on {}", group.group, group.stream);
        };

        match position {
            ReadPosition::Pending { after } => Ok(state
                .pending
                .range(first_index_after(after)..)
                .filter(|(_, consumer)| **consumer == group.consumer)
                .take(count)
                .map(|(index, _)| entries[*index].clone())
                .collect()),
            ReadPosition::New => {
                let end = entries.len().min(state.next_index + count);
                let delivered: Vec<StreamEntry> = entries[state.next_index..end].to_vec();
                for index in state.next_index..end {
                    state.pending.insert(index, group.consumer.clone());
                }
                state.next_index = end;
                Ok(delivered)
            }
        }
    }
}

#[async_trait]
impl EventLogPort for InMemoryEventLog {
    async fn ensure_group(&self, group: &ConsumerGroup) -> Result<()> {
        let mut guard = lock(&self.streams)?;
        guard
            .entry(group.stream.clone())
            .or_default()
            .groups
            .entry(group.group.clone())
            .or_default();
        Ok(())
    }

    async fn read_group(
        &self,
        group: &ConsumerGroup,
        position: &ReadPosition,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>> {
        let appended = self.appended.notified();
        let entries = self.take(group, position, count)?;
        if !entries.is_empty() || *position != ReadPosition::New || block.is_zero() {
            return Ok(entries);
        }
        if tokio::time::timeout(block, appended).await.is_err() {
            return Ok(Vec::new());
        }
        self.take(group, position, count)
    }

    async fn ack(&self, group: &ConsumerGroup, id: &str) -> Result<()> {
        let mut guard = lock(&self.streams)?;
        if let Some(stream) = guard.get_mut(&group.stream) {
            if let Some(index) = stream.index_of(id) {
                if let Some(state) = stream.groups.get_mut(&group.group) {
                    state.pending.remove(&index);
                }
            }
        }
        Ok(())
    }

    async fn append(&self, stream: &str, fields: &EventFields) -> Result<String> {
        let id = {
            let mut guard = lock(&self.streams)?;
            let state = guard.entry(stream.to_string()).or_default();
            state.next_seq += 1;
            let id = format!("{}-0", state.next_seq);
            state.entries.push(StreamEntry {
                id: id.clone(),
                fields: fields.clone(),
            });
            id
        };
        self.appended.notify_waiters();
        Ok(id)
    }
}

type SinkKey = (String, String);

fn key(owner_id: &str, sink_id: &str) -> SinkKey {
    (owner_id.to_string(), sink_id.to_string())
}

#[derive(Clone, Default)]
pub struct InMemoryEntryStore {
    entries: Arc<Mutex<HashMap<SinkKey, DeploymentEntry>>>,
}

impl InMemoryEntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|guard| guard.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DeploymentEntryPort for InMemoryEntryStore {
    async fn get(&self, owner_id: &str, sink_id: &str) -> Result<Option<DeploymentEntry>> {
        Ok(lock(&self.entries)?.get(&key(owner_id, sink_id)).cloned())
    }

    async fn put(&self, owner_id: &str, sink_id: &str, entry: &DeploymentEntry) -> Result<()> {
        lock(&self.entries)?.insert(key(owner_id, sink_id), entry.clone());
        Ok(())
    }

    async fn delete(&self, owner_id: &str, sink_id: &str) -> Result<()> {
        lock(&self.entries)?.remove(&key(owner_id, sink_id));
        Ok(())
    }

    async fn exists(&self, owner_id: &str, sink_id: &str) -> Result<bool> {
        Ok(lock(&self.entries)?.contains_key(&key(owner_id, sink_id)))
    }
}

#[derive(Clone, Default)]
pub struct InMemorySinkStateStore {
    statuses: Arc<Mutex<HashMap<SinkKey, SinkStatus>>>,
}

impl InMemorySinkStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, owner_id: &str, sink_id: &str, f: impl FnOnce(&mut SinkStatus)) -> Result<()> {
        let mut guard = lock(&self.statuses)?;
        f(guard.entry(key(owner_id, sink_id)).or_default());
        Ok(())
    }
}

#[async_trait]
impl SinkStatePort for InMemorySinkStateStore {
    async fn get(&self, owner_id: &str, sink_id: &str) -> Result<Option<SinkStatus>> {
        Ok(lock(&self.statuses)?.get(&key(owner_id, sink_id)).cloned())
    }

    async fn set_state(&self, owner_id: &str, sink_id: &str, state: HealthState) -> Result<()> {
        self.update(owner_id, sink_id, |status| status.state = state)
    }

    async fn record_activity(
        &self,
        owner_id: &str,
        sink_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.update(owner_id, sink_id, |status| status.last_activity = Some(at))
    }

    async fn clear_activity(&self, owner_id: &str, sink_id: &str) -> Result<()> {
        self.update(owner_id, sink_id, |status| status.last_activity = None)
    }

    async fn remove(&self, owner_id: &str, sink_id: &str) -> Result<()> {
        lock(&self.statuses)?.remove(&key(owner_id, sink_id));
        Ok(())
    }
}
