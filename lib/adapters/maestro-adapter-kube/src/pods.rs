use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::Client;
use kube::api::{Api, ListParams, LogParams};

use maestro_ports::{ClusterPort, CollectorPod};

use crate::kubectl::{Kubectl, ManifestAction};

/// Cluster port bound to the collector namespace.
#[derive(Clone)]
pub struct KubeCluster {
    pods: Api<Pod>,
    namespace: String,
    kubectl: Kubectl,
}

impl KubeCluster {
    pub fn new(client: Client, namespace: &str, kubectl_program: &str) -> Self {
        Self {
            pods: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
            kubectl: Kubectl::new(kubectl_program, namespace),
        }
    }

    /// Connects with the in-cluster or kubeconfig credentials.
    pub async fn connect(namespace: &str, kubectl_program: &str) -> Result<Self> {
        let client = Client::try_default()
            .await
            .context("failed to create kubernetes client")?;
        Ok(Self::new(client, namespace, kubectl_program))
    }
}

fn collector_pod(pod: &Pod) -> Option<CollectorPod> {
    let name = pod.metadata.name.clone()?;
    Some(CollectorPod {
        name,
        phase: pod.status.as_ref().and_then(|status| status.phase.clone()),
        terminating: pod.metadata.deletion_timestamp.is_some(),
    })
}

#[async_trait]
impl ClusterPort for KubeCluster {
    async fn list_collectors(&self) -> Result<Vec<CollectorPod>> {
        let list = self
            .pods
            .list(&ListParams::default())
            .await
            .with_context(|| format!("failed to list pods in {}", self.namespace))?;
        Ok(list.items.iter().filter_map(collector_pod).collect())
    }

    async fn apply_manifest(&self, manifest: &str) -> Result<()> {
        self.kubectl.run(ManifestAction::Apply, manifest).await
    }

    async fn delete_manifest(&self, manifest: &str) -> Result<()> {
        self.kubectl.run(ManifestAction::Delete, manifest).await
    }

    async fn collector_logs(&self, pod: &str, tail_lines: i64) -> Result<String> {
        self.pods
            .logs(
                pod,
                &LogParams {
                    tail_lines: Some(tail_lines),
                    ..Default::default()
                },
            )
            .await
            .with_context(|| format!("failed to read logs of pod {pod}"))
    }
}
