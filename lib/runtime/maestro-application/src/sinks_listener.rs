use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use maestro_domain::{
    DecodeError, DeploymentEntry, EventFields, ManifestSettings, SinkChange, SinksEvent,
};
use maestro_ports::{DeploymentEntryPort, SinkStatePort};

use crate::cluster_control::{ClusterControl, CollectorState};
use crate::consumer::StreamHandler;

/// Keeps deployment entries in step with sink lifecycle events.
pub struct SinksListener {
    entries: Arc<dyn DeploymentEntryPort>,
    states: Arc<dyn SinkStatePort>,
    cluster: ClusterControl,
    settings: ManifestSettings,
}

impl SinksListener {
    pub fn new(
        entries: Arc<dyn DeploymentEntryPort>,
        states: Arc<dyn SinkStatePort>,
        cluster: ClusterControl,
        settings: ManifestSettings,
    ) -> Self {
        Self {
            entries,
            states,
            cluster,
            settings,
        }
    }

    async fn store(&self, change: &SinkChange) -> Result<DeploymentEntry> {
        let entry = DeploymentEntry::render(&change.owner_id, &change.spec, &self.settings)?;
        self.entries
            .put(&change.owner_id, change.sink_id(), &entry)
            .await?;
        Ok(entry)
    }

    /// Stores the rendered entry. Nothing is deployed until the sink shows
    /// activity.
    pub async fn create(&self, change: SinkChange) -> Result<()> {
        self.store(&change).await?;
        tracing::info!(
            owner_id = %change.owner_id,
            sink_id = %change.sink_id(),
            "deployment entry created"
        );
        Ok(())
    }

    pub async fn update(&self, change: SinkChange) -> Result<()> {
        let entry = self.store(&change).await?;
        let sink_id = change.sink_id();
        tracing::info!(owner_id = %change.owner_id, %sink_id, "deployment entry updated");

        if self.cluster.state(&change.owner_id, sink_id).await? == CollectorState::Active {
            self.cluster
                .update(&change.owner_id, sink_id, &entry.manifest)
                .await?;
        }
        Ok(())
    }

    /// Removes the collector with the stored manifest, then the entry, so a
    /// failed cluster delete is retried with the manifest still at hand.
    pub async fn delete(&self, owner_id: &str, sink_id: &str) -> Result<()> {
        match self.entries.get(owner_id, sink_id).await? {
            Some(entry) => {
                self.cluster
                    .delete(owner_id, sink_id, &entry.manifest)
                    .await?;
                self.entries.delete(owner_id, sink_id).await?;
            }
            None => {
                if self.cluster.state(owner_id, sink_id).await? == CollectorState::Active {
                    tracing::warn!(
                        %owner_id,
                        %sink_id,
                        "no deployment entry for deleted sink, collector left running"
                    );
                }
            }
        }
        self.states.remove(owner_id, sink_id).await?;
        tracing::info!(%owner_id, %sink_id, "sink removed");
        Ok(())
    }
}

#[async_trait]
impl StreamHandler for SinksListener {
    type Event = SinksEvent;

    fn name(&self) -> &'static str {
        "sinks"
    }

    fn decode(&self, fields: &EventFields) -> Result<SinksEvent, DecodeError> {
        SinksEvent::decode(fields)
    }

    /// A stale create or update replayed after a newer delete would bring
    /// the entry back.
    fn ordering_key(&self, event: &SinksEvent) -> Option<String> {
        Some(format!("{}/{}", event.owner_id(), event.sink_id()))
    }

    async fn handle(&self, event: SinksEvent) -> Result<()> {
        match event {
            SinksEvent::Create(change) => self.create(change).await,
            SinksEvent::Update(change) => self.update(change).await,
            SinksEvent::Delete { owner_id, sink_id } => self.delete(&owner_id, &sink_id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use maestro_domain::HealthState;
    use maestro_ports::{InMemoryEntryStore, InMemorySinkStateStore};

    use crate::testing::{self, FakeCluster};

    struct Fixture {
        entries: InMemoryEntryStore,
        states: InMemorySinkStateStore,
        cluster: FakeCluster,
        listener: SinksListener,
    }

    fn fixture(cluster: FakeCluster) -> Fixture {
        let entries = InMemoryEntryStore::new();
        let states = InMemorySinkStateStore::new();
        let listener = SinksListener::new(
            Arc::new(entries.clone()),
            Arc::new(states.clone()),
            ClusterControl::new(Arc::new(cluster.clone())),
            testing::settings(),
        );
        Fixture {
            entries,
            states,
            cluster,
            listener,
        }
    }

    fn change(sink_id: &str, endpoint: &str) -> SinkChange {
        let mut spec = testing::spec(sink_id);
        spec.endpoint = endpoint.to_string();
        SinkChange {
            owner_id: "owner-1".into(),
            spec,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_stores_entry_without_deploying() {
        let f = fixture(FakeCluster::new());
        f.listener.create(change("sink-1", "https://x")).await.unwrap();

        let entry = f.entries.get("owner-1", "sink-1").await.unwrap().unwrap();
        assert_eq!(entry.endpoint, "https://x");
        assert_eq!(f.cluster.apply_count(), 0);
    }

    #[tokio::test]
    async fn test_replayed_create_is_harmless() {
        let f = fixture(FakeCluster::new());
        f.listener.create(change("sink-1", "https://x")).await.unwrap();
        f.listener.create(change("sink-1", "https://x")).await.unwrap();

        assert_eq!(f.entries.len(), 1);
        assert_eq!(f.cluster.apply_count(), 0);
    }

    #[tokio::test]
    async fn test_update_without_collector_only_rewrites_entry() {
        let f = fixture(FakeCluster::new());
        f.listener.create(change("sink-1", "https://x")).await.unwrap();
        f.listener.update(change("sink-1", "https://y")).await.unwrap();

        let entry = f.entries.get("owner-1", "sink-1").await.unwrap().unwrap();
        assert_eq!(entry.endpoint, "https://y");
        assert_eq!(f.cluster.delete_count(), 0);
        assert_eq!(f.cluster.apply_count(), 0);
    }

    #[tokio::test]
    async fn test_update_with_collector_redeploys() {
        let f = fixture(FakeCluster::with_pods(&["otel-sink-1-6d5f8-abcde"]));
        f.listener.update(change("sink-1", "https://y")).await.unwrap();

        assert_eq!(f.cluster.delete_count(), 1);
        assert_eq!(f.cluster.apply_count(), 1);
        assert_eq!(f.cluster.pods().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_endpoint_is_a_handling_error() {
        let f = fixture(FakeCluster::new());
        assert!(f.listener.create(change("sink-1", "ftp://x")).await.is_err());
        assert!(f.entries.is_empty());
    }

    #[tokio::test]
    async fn test_delete_removes_collector_and_entry() {
        let f = fixture(FakeCluster::with_pods(&["otel-sink-1-6d5f8-abcde"]));
        f.listener.create(change("sink-1", "https://x")).await.unwrap();
        f.states
            .set_state("owner-1", "sink-1", HealthState::Active)
            .await
            .unwrap();

        f.listener.delete("owner-1", "sink-1").await.unwrap();

        assert_eq!(f.cluster.delete_count(), 1);
        assert!(f.cluster.pods().is_empty());
        assert!(!f.entries.exists("owner-1", "sink-1").await.unwrap());
        assert_eq!(f.states.get("owner-1", "sink-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failed_cluster_delete_keeps_entry_for_retry() {
        let f = fixture(FakeCluster::with_pods(&["otel-sink-1-6d5f8-abcde"]));
        f.listener.create(change("sink-1", "https://x")).await.unwrap();
        f.cluster.fail_list(true);

        assert!(f.listener.delete("owner-1", "sink-1").await.is_err());
        assert!(f.entries.exists("owner-1", "sink-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_without_entry_is_acknowledged() {
        let f = fixture(FakeCluster::with_pods(&["otel-sink-1-6d5f8-abcde"]));
        f.listener.delete("owner-1", "sink-1").await.unwrap();
        assert_eq!(f.cluster.delete_count(), 0);
    }
}
