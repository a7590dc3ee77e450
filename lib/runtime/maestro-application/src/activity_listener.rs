use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use maestro_domain::{DecodeError, EventFields, SinkActivity, SinkerEvent};
use maestro_ports::{DeploymentEntryPort, SinkStatePort};

use crate::cluster_control::ClusterControl;
use crate::consumer::StreamHandler;

/// Deploys collectors for sinks the metrics pipeline reports as active.
pub struct ActivityListener {
    entries: Arc<dyn DeploymentEntryPort>,
    states: Arc<dyn SinkStatePort>,
    cluster: ClusterControl,
}

impl ActivityListener {
    pub fn new(
        entries: Arc<dyn DeploymentEntryPort>,
        states: Arc<dyn SinkStatePort>,
        cluster: ClusterControl,
    ) -> Self {
        Self {
            entries,
            states,
            cluster,
        }
    }

    pub async fn activity(&self, activity: SinkActivity) -> Result<()> {
        let SinkActivity {
            owner_id,
            sink_id,
            timestamp,
        } = activity;
        let Some(entry) = self.entries.get(&owner_id, &sink_id).await? else {
            tracing::warn!(
                %owner_id,
                %sink_id,
                "activity for sink without deployment entry, skipping"
            );
            return Ok(());
        };

        self.cluster
            .apply(&owner_id, &sink_id, &entry.manifest)
            .await?;
        self.states
            .record_activity(&owner_id, &sink_id, timestamp)
            .await
    }

    pub async fn idle(&self, activity: SinkActivity) -> Result<()> {
        tracing::info!(owner_id = %activity.owner_id, sink_id = %activity.sink_id, "sink reported idle");
        self.states
            .clear_activity(&activity.owner_id, &activity.sink_id)
            .await
    }
}

#[async_trait]
impl StreamHandler for ActivityListener {
    type Event = SinkerEvent;

    fn name(&self) -> &'static str {
        "activity"
    }

    fn decode(&self, fields: &EventFields) -> Result<SinkerEvent, DecodeError> {
        SinkerEvent::decode(fields)
    }

    async fn handle(&self, event: SinkerEvent) -> Result<()> {
        match event {
            SinkerEvent::Activity(activity) => self.activity(activity).await,
            SinkerEvent::Idle(activity) => self.idle(activity).await,
            SinkerEvent::StateChanged(_) => Ok(()),
        }
    }
}
