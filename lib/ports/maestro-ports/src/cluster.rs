use anyhow::Result;
use async_trait::async_trait;

/// A collector pod as seen in the collector namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorPod {
    pub name: String,
    pub phase: Option<String>,
    /// Deletion requested; the pod lingers until its grace period ends.
    pub terminating: bool,
}

impl CollectorPod {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phase: None,
            terminating: false,
        }
    }

    /// Pod names embed the sink id through the `otel-<sinkID>` deployment.
    pub fn belongs_to(&self, sink_id: &str) -> bool {
        !sink_id.is_empty() && self.name.contains(sink_id)
    }

    /// False once the pod is being deleted or has run to completion.
    pub fn is_live(&self) -> bool {
        !self.terminating && !matches!(self.phase.as_deref(), Some("Succeeded" | "Failed"))
    }
}

/// Cluster primitives. Idempotency is layered on top by the caller.
#[async_trait]
pub trait ClusterPort: Send + Sync {
    /// Every pod in the collector namespace, including ones on their way out.
    async fn list_collectors(&self) -> Result<Vec<CollectorPod>>;
    async fn apply_manifest(&self, manifest: &str) -> Result<()>;
    async fn delete_manifest(&self, manifest: &str) -> Result<()>;
    async fn collector_logs(&self, pod: &str, tail_lines: i64) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminating_and_finished_pods_are_not_live() {
        let running = CollectorPod {
            phase: Some("Running".into()),
            ..CollectorPod::new("otel-sink-1-abc")
        };
        assert!(running.is_live());

        let terminating = CollectorPod {
            terminating: true,
            ..running.clone()
        };
        assert!(!terminating.is_live());

        for phase in ["Succeeded", "Failed"] {
            let finished = CollectorPod {
                phase: Some(phase.into()),
                ..running.clone()
            };
            assert!(!finished.is_live());
        }
        assert!(CollectorPod::new("otel-sink-1-abc").is_live());
    }
}
