use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use maestro_domain::events::{SINKER_STREAM, SINKS_STREAM};
use maestro_domain::{DeploymentEntry, HealthState, MaestroConfig, SinkRecord};
use maestro_ports::{
    ClusterPort, CollectorPod, ConsumerGroup, DeploymentEntryPort, EventLogPort, SinkFilter,
    SinkRegistryPort, SinkStatePort,
};

use crate::activity_listener::ActivityListener;
use crate::cluster_control::ClusterControl;
use crate::consumer::StreamConsumer;
use crate::monitor::Monitor;
use crate::sinks_listener::SinksListener;

/// Handles to everything outside the process.
#[derive(Clone)]
pub struct MaestroPorts {
    /// Log holding `orb.sinks`.
    pub sinks_log: Arc<dyn EventLogPort>,
    /// Log holding `orb.sinker`, read by the Activity Listener.
    pub sinker_log: Arc<dyn EventLogPort>,
    /// Where the monitor publishes `sinker.update`. Same stream as
    /// `sinker_log`, but must not share a connection with its blocking read.
    pub updates_log: Arc<dyn EventLogPort>,
    pub entries: Arc<dyn DeploymentEntryPort>,
    pub states: Arc<dyn SinkStatePort>,
    pub cluster: Arc<dyn ClusterPort>,
    pub registry: Arc<dyn SinkRegistryPort>,
}

/// Composition root: startup reconciliation, then the two listeners and the
/// monitor until cancelled.
pub struct MaestroService {
    ports: MaestroPorts,
    config: MaestroConfig,
}

impl MaestroService {
    pub fn new(ports: MaestroPorts, config: MaestroConfig) -> Self {
        Self { ports, config }
    }

    fn cluster_control(&self) -> ClusterControl {
        ClusterControl::new(self.ports.cluster.clone())
    }

    fn consumer_group(&self, stream: &str) -> ConsumerGroup {
        ConsumerGroup::new(
            stream,
            self.config.consumer.group.as_str(),
            self.config.consumer.name.as_str(),
        )
    }

    /// Creates missing deployment entries for every exporting sink and
    /// applies collectors the registry reports active but that are not
    /// running. Returns the number of sinks that failed to reconcile.
    pub async fn reconcile_startup(&self) -> Result<usize> {
        let sinks = self
            .ports
            .registry
            .retrieve_sinks(&SinkFilter::otel_enabled())
            .await
            .context("failed to retrieve sinks at startup")?;
        let pods = self
            .ports
            .cluster
            .list_collectors()
            .await
            .context("failed to list collectors at startup")?;
        tracing::info!(sinks = sinks.len(), collectors = pods.len(), "reconciling sinks");

        let mut failed = 0;
        for sink in &sinks {
            if let Err(e) = self.reconcile_sink(sink, &pods).await {
                failed += 1;
                tracing::warn!(
                    owner_id = %sink.owner_id,
                    sink_id = %sink.id,
                    "failed to reconcile sink: {:#}",
                    e
                );
            }
        }
        Ok(failed)
    }

    async fn reconcile_sink(&self, sink: &SinkRecord, pods: &[CollectorPod]) -> Result<()> {
        let entry = match self.ports.entries.get(&sink.owner_id, &sink.id).await? {
            Some(entry) => entry,
            None => {
                let spec = sink.collector_spec()?;
                let entry = DeploymentEntry::render(
                    &sink.owner_id,
                    &spec,
                    &self.config.cluster.manifest_settings(),
                )?;
                self.ports
                    .entries
                    .put(&sink.owner_id, &sink.id, &entry)
                    .await?;
                tracing::info!(owner_id = %sink.owner_id, sink_id = %sink.id, "deployment entry restored");
                entry
            }
        };

        if sink.health() == HealthState::Active
            && ClusterControl::find_collector(pods, &sink.id).is_none()
        {
            self.cluster_control()
                .apply(&sink.owner_id, &sink.id, &entry.manifest)
                .await?;
        }
        Ok(())
    }

    fn sinks_consumer(&self) -> StreamConsumer<SinksListener> {
        StreamConsumer::new(
            self.ports.sinks_log.clone(),
            self.consumer_group(SINKS_STREAM),
            self.config.consumer.clone(),
            SinksListener::new(
                self.ports.entries.clone(),
                self.ports.states.clone(),
                self.cluster_control(),
                self.config.cluster.manifest_settings(),
            ),
        )
    }

    fn activity_consumer(&self) -> StreamConsumer<ActivityListener> {
        StreamConsumer::new(
            self.ports.sinker_log.clone(),
            self.consumer_group(SINKER_STREAM),
            self.config.consumer.clone(),
            ActivityListener::new(
                self.ports.entries.clone(),
                self.ports.states.clone(),
                self.cluster_control(),
            ),
        )
    }

    fn monitor(&self) -> Monitor {
        Monitor::new(
            self.ports.registry.clone(),
            self.cluster_control(),
            self.ports.states.clone(),
            self.ports.updates_log.clone(),
            self.config.monitor.clone(),
        )
    }

    /// Runs until the token is cancelled or one of the loops fails, which
    /// cancels the others.
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        self.reconcile_startup().await?;

        let sinks = self.sinks_consumer();
        let activity = self.activity_consumer();
        let monitor = self.monitor();

        let handles = [
            spawn_task("sinks listener", token.clone(), {
                let token = token.clone();
                async move { sinks.run(token).await }
            }),
            spawn_task("activity listener", token.clone(), {
                let token = token.clone();
                async move { activity.run(token).await }
            }),
            spawn_task("monitor", token.clone(), {
                let token = token.clone();
                async move { monitor.run(token).await }
            }),
        ];

        let mut result = Ok(());
        for handle in handles {
            let outcome = handle.await.context("service task panicked");
            if let Err(e) = outcome.and_then(|inner| inner) {
                token.cancel();
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        tracing::info!("maestro stopped");
        result
    }
}

fn spawn_task<F>(name: &'static str, token: CancellationToken, task: F) -> JoinHandle<Result<()>>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let result = task.await;
        if let Err(e) = &result {
            tracing::error!(task = name, "task failed, shutting down: {:#}", e);
            token.cancel();
        }
        result
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_ports::{InMemoryEntryStore, InMemoryEventLog, InMemorySinkStateStore};

    use crate::testing::{self, FakeCluster, FakeRegistry};

    struct Fixture {
        entries: InMemoryEntryStore,
        cluster: FakeCluster,
        registry: FakeRegistry,
        sinker_log: InMemoryEventLog,
        updates_log: InMemoryEventLog,
        service: MaestroService,
    }

    fn fixture(cluster: FakeCluster, sinks: Vec<SinkRecord>) -> Fixture {
        let entries = InMemoryEntryStore::new();
        let registry = FakeRegistry::new(sinks);
        let sinker_log = InMemoryEventLog::new();
        let updates_log = InMemoryEventLog::new();
        let ports = MaestroPorts {
            sinks_log: Arc::new(InMemoryEventLog::new()),
            sinker_log: Arc::new(sinker_log.clone()),
            updates_log: Arc::new(updates_log.clone()),
            entries: Arc::new(entries.clone()),
            states: Arc::new(InMemorySinkStateStore::new()),
            cluster: Arc::new(cluster.clone()),
            registry: Arc::new(registry.clone()),
        };
        Fixture {
            entries,
            cluster,
            registry,
            sinker_log,
            updates_log,
            service: MaestroService::new(ports, MaestroConfig::default()),
        }
    }

    #[tokio::test]
    async fn test_reconcile_restores_entries_and_active_collectors() {
        let f = fixture(
            FakeCluster::new(),
            vec![
                testing::sink_record("owner-1", "sink-1", "active"),
                testing::sink_record("owner-1", "sink-2", "idle"),
            ],
        );

        assert_eq!(f.service.reconcile_startup().await.unwrap(), 0);

        assert_eq!(f.entries.len(), 2);
        assert_eq!(f.cluster.apply_count(), 1);
        assert_eq!(f.cluster.pods(), vec!["otel-sink-1-6d5f8-abcde"]);
    }

    #[tokio::test]
    async fn test_reconcile_leaves_running_collectors_alone() {
        let f = fixture(
            FakeCluster::with_pods(&["otel-sink-1-6d5f8-abcde"]),
            vec![testing::sink_record("owner-1", "sink-1", "active")],
        );

        f.service.reconcile_startup().await.unwrap();

        assert_eq!(f.cluster.apply_count(), 0);
        assert!(f.entries.exists("owner-1", "sink-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_reconcile_skips_bad_sink_config() {
        let mut broken = testing::sink_record("owner-1", "sink-bad", "active");
        broken.config = serde_json::json!({"opentelemetry": "enabled"});
        let f = fixture(
            FakeCluster::new(),
            vec![broken, testing::sink_record("owner-1", "sink-1", "idle")],
        );

        assert_eq!(f.service.reconcile_startup().await.unwrap(), 1);
        assert_eq!(f.entries.len(), 1);
    }

    #[tokio::test]
    async fn test_registry_failure_at_startup_is_fatal() {
        let f = fixture(FakeCluster::new(), vec![]);
        f.registry.fail(true);
        assert!(f.service.reconcile_startup().await.is_err());
        assert!(f.service.run(CancellationToken::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_cluster_failure_at_startup_is_fatal() {
        let f = fixture(FakeCluster::new(), vec![]);
        f.cluster.fail_list(true);
        assert!(f.service.reconcile_startup().await.is_err());
    }

    #[tokio::test]
    async fn test_monitor_publishes_on_updates_log() {
        let f = fixture(
            FakeCluster::with_pods(&["otel-sink-1-6d5f8-abcde"]),
            vec![testing::sink_record("owner-1", "sink-1", "active")],
        );
        f.cluster.set_logs(
            "sink-1",
            "2024-05-01T10:00:00.000Z\terror\texporterhelper/queued_retry.go:391\tExporting failed.\t{\"error\": \"429 too many requests\"}",
        );

        assert_eq!(f.service.monitor().tick().await.unwrap(), 1);

        let published = f.updates_log.entries(SINKER_STREAM);
        assert_eq!(published.len(), 1);
        assert_eq!(published[0]["state"], "warning");
        assert!(f.sinker_log.entries(SINKER_STREAM).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_returns_after_cancel() {
        let f = fixture(FakeCluster::new(), vec![]);
        let token = CancellationToken::new();
        let service = Arc::new(f.service);

        let task = {
            let service = service.clone();
            let token = token.clone();
            tokio::spawn(async move { service.run(token).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        token.cancel();

        task.await.unwrap().unwrap();
    }
}
