use std::sync::Arc;

use anyhow::Result;

use maestro_ports::{ClusterPort, CollectorPod};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Active,
    Deleted,
}

/// Idempotent apply/delete of collector manifests.
///
/// Whether a collector exists is always read back from the cluster, never
/// remembered locally.
#[derive(Clone)]
pub struct ClusterControl {
    cluster: Arc<dyn ClusterPort>,
}

impl ClusterControl {
    pub fn new(cluster: Arc<dyn ClusterPort>) -> Self {
        Self { cluster }
    }

    /// Terminating or finished pods do not count: after a delete the old pod
    /// lingers for its grace period.
    pub fn find_collector<'a>(pods: &'a [CollectorPod], sink_id: &str) -> Option<&'a CollectorPod> {
        pods.iter().find(|pod| pod.is_live() && pod.belongs_to(sink_id))
    }

    pub async fn running_collectors(&self) -> Result<Vec<CollectorPod>> {
        let mut pods = self.cluster.list_collectors().await?;
        pods.retain(CollectorPod::is_live);
        Ok(pods)
    }

    pub async fn state(&self, owner_id: &str, sink_id: &str) -> Result<CollectorState> {
        let pods = self.cluster.list_collectors().await.inspect_err(|e| {
            tracing::error!(%owner_id, %sink_id, "failed to list collector pods: {}", e);
        })?;
        Ok(match Self::find_collector(&pods, sink_id) {
            Some(_) => CollectorState::Active,
            None => CollectorState::Deleted,
        })
    }

    pub async fn apply(&self, owner_id: &str, sink_id: &str, manifest: &str) -> Result<()> {
        if self.state(owner_id, sink_id).await? == CollectorState::Active {
            tracing::info!(%owner_id, %sink_id, "collector already applied");
            return Ok(());
        }
        self.cluster.apply_manifest(manifest).await.inspect_err(|e| {
            tracing::error!(%owner_id, %sink_id, "failed to apply collector: {:#}", e);
        })?;
        tracing::info!(%owner_id, %sink_id, "collector applied");
        Ok(())
    }

    pub async fn delete(&self, owner_id: &str, sink_id: &str, manifest: &str) -> Result<()> {
        if self.state(owner_id, sink_id).await? == CollectorState::Deleted {
            tracing::info!(%owner_id, %sink_id, "collector already deleted");
            return Ok(());
        }
        self.cluster.delete_manifest(manifest).await.inspect_err(|e| {
            tracing::error!(%owner_id, %sink_id, "failed to delete collector: {:#}", e);
        })?;
        tracing::info!(%owner_id, %sink_id, "collector deleted");
        Ok(())
    }

    /// Delete then apply. The collector is down in between.
    pub async fn update(&self, owner_id: &str, sink_id: &str, manifest: &str) -> Result<()> {
        self.delete(owner_id, sink_id, manifest).await?;
        self.apply(owner_id, sink_id, manifest).await
    }

    pub async fn collector_logs(&self, pod: &str, tail_lines: i64) -> Result<String> {
        self.cluster.collector_logs(pod, tail_lines).await
    }
}
