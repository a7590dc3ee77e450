use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use maestro_domain::events::SINKER_STREAM;
use maestro_domain::{HealthState, MonitorConfig, SinkRecord, SinkerUpdateEvent};
use maestro_ports::{CollectorPod, EventLogPort, SinkFilter, SinkRegistryPort, SinkStatePort};

use crate::cluster_control::ClusterControl;
use crate::log_analysis::{self, Classification};

/// Periodically classifies running collectors from their logs and publishes
/// health changes to the sinker stream.
pub struct Monitor {
    registry: Arc<dyn SinkRegistryPort>,
    cluster: ClusterControl,
    states: Arc<dyn SinkStatePort>,
    log: Arc<dyn EventLogPort>,
    settings: MonitorConfig,
}

impl Monitor {
    pub fn new(
        registry: Arc<dyn SinkRegistryPort>,
        cluster: ClusterControl,
        states: Arc<dyn SinkStatePort>,
        log: Arc<dyn EventLogPort>,
        settings: MonitorConfig,
    ) -> Self {
        Self {
            registry,
            cluster,
            states,
            log,
            settings,
        }
    }

    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        let mut ticker = interval(self.settings.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; wait a full interval.
        ticker.tick().await;
        tracing::info!(interval = ?self.settings.interval(), "monitor started");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.tick().await {
                Ok(published) => tracing::debug!(published, "monitor tick finished"),
                Err(e) => tracing::error!("monitor tick failed: {:#}", e),
            }
        }

        tracing::info!("monitor stopped");
        Ok(())
    }

    fn idle_threshold(&self) -> TimeDelta {
        TimeDelta::from_std(self.settings.idle_threshold()).unwrap_or(TimeDelta::MAX)
    }

    /// One monitoring pass. Returns the number of published state changes.
    pub async fn tick(&self) -> Result<usize> {
        let pods = self.cluster.running_collectors().await?;
        if pods.is_empty() {
            tracing::info!("no running collectors, skipping");
            return Ok(0);
        }

        let sinks = self
            .registry
            .retrieve_sinks(&SinkFilter::otel_enabled())
            .await?;
        tracing::info!(sinks = sinks.len(), collectors = pods.len(), "reading collector logs");

        let mut published = 0;
        for sink in &sinks {
            let Some(pod) = ClusterControl::find_collector(&pods, &sink.id) else {
                tracing::info!(sink_id = %sink.id, "collector not found for sink, skipping");
                continue;
            };
            match self.check_sink(sink, pod).await {
                Ok(true) => published += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(
                    owner_id = %sink.owner_id,
                    sink_id = %sink.id,
                    "failed to check collector: {:#}",
                    e
                ),
            }
        }
        Ok(published)
    }

    async fn check_sink(&self, sink: &SinkRecord, pod: &CollectorPod) -> Result<bool> {
        let now = Utc::now();
        let threshold = self.idle_threshold();

        if let Some(at) = sink.last_remote_write() {
            if now - at < threshold {
                tracing::debug!(sink_id = %sink.id, "collector recently wrote, skipping");
                return Ok(false);
            }
        }

        let logs = self
            .cluster
            .collector_logs(&pod.name, self.settings.log_tail_lines)
            .await?;
        let mut classification = log_analysis::classify(&logs, now, threshold);
        let Some(mut state) = classification.health() else {
            tracing::warn!(
                sink_id = %sink.id,
                pod = %pod.name,
                "could not classify collector logs: {}",
                classification.message()
            );
            return Ok(false);
        };

        let stored = self.states.get(&sink.owner_id, &sink.id).await?;
        let last_activity = stored.as_ref().and_then(|status| status.last_activity);
        if state == HealthState::Idle && recently_active(last_activity, now, threshold) {
            state = HealthState::Active;
            classification = Classification::Active;
        }

        let last_known = stored
            .map(|status| status.state)
            .filter(|state| *state != HealthState::Unknown)
            .unwrap_or_else(|| sink.health());
        if last_known == state {
            return Ok(false);
        }

        tracing::info!(
            owner_id = %sink.owner_id,
            sink_id = %sink.id,
            before = %last_known,
            after = %state,
            "updating sink state"
        );
        let event =
            SinkerUpdateEvent::new(&sink.owner_id, &sink.id, state, classification.message());
        self.log.append(SINKER_STREAM, &event.encode()).await?;
        self.states.set_state(&sink.owner_id, &sink.id, state).await?;
        Ok(true)
    }
}

fn recently_active(
    last_activity: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    threshold: TimeDelta,
) -> bool {
    last_activity.is_some_and(|at| now - at < threshold)
}
