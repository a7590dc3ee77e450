//! Counting fakes shared by the application tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde_json::json;

use maestro_domain::manifest::render as render_manifest;
use maestro_domain::{CollectorSpec, ExporterBackend, ManifestSettings, SinkRecord};
use maestro_ports::{ClusterPort, CollectorPod, SinkFilter, SinkRegistryPort};

pub fn spec(sink_id: &str) -> CollectorSpec {
    CollectorSpec {
        sink_id: sink_id.to_string(),
        backend: ExporterBackend::Prometheus,
        endpoint: "https://x".to_string(),
        username: "u".to_string(),
        password: "p".to_string(),
    }
}

pub fn settings() -> ManifestSettings {
    ManifestSettings::new("kafka:9092")
}

pub fn manifest(sink_id: &str) -> String {
    render_manifest(&spec(sink_id), &settings()).unwrap()
}

pub fn sink_record(owner_id: &str, sink_id: &str, state: &str) -> SinkRecord {
    SinkRecord {
        id: sink_id.to_string(),
        owner_id: owner_id.to_string(),
        backend: "prometheus".to_string(),
        state: state.to_string(),
        config: json!({
            "exporter": {"remote_host": "https://x"},
            "authentication": {"type": "basicauth", "username": "u", "password": "p"},
            "opentelemetry": "enabled"
        }),
    }
}

fn deployment_name(manifest: &str) -> Option<String> {
    manifest.split("---\n").find_map(|doc| {
        let value: serde_yaml::Value = serde_yaml::from_str(doc).ok()?;
        if value["kind"].as_str() != Some("Deployment") {
            return None;
        }
        value["metadata"]["name"].as_str().map(str::to_string)
    })
}

#[derive(Default)]
struct ClusterState {
    pods: Vec<CollectorPod>,
    applies: usize,
    deletes: usize,
    logs: HashMap<String, String>,
    fail_apply: bool,
    fail_list: bool,
    linger_on_delete: bool,
}

/// Cluster that turns applied Deployments into pods and counts calls.
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pods(pods: &[&str]) -> Self {
        let cluster = Self::new();
        cluster.state.lock().unwrap().pods = pods.iter().map(|p| CollectorPod::new(*p)).collect();
        cluster
    }

    pub fn apply_count(&self) -> usize {
        self.state.lock().unwrap().applies
    }

    pub fn delete_count(&self) -> usize {
        self.state.lock().unwrap().deletes
    }

    /// Names of pods that are not terminating.
    pub fn pods(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .pods
            .iter()
            .filter(|pod| !pod.terminating)
            .map(|pod| pod.name.clone())
            .collect()
    }

    /// Deleted pods stay listed as terminating, like a pod in its grace
    /// period.
    pub fn linger_on_delete(&self, linger: bool) {
        self.state.lock().unwrap().linger_on_delete = linger;
    }

    pub fn fail_apply(&self, fail: bool) {
        self.state.lock().unwrap().fail_apply = fail;
    }

    pub fn fail_list(&self, fail: bool) {
        self.state.lock().unwrap().fail_list = fail;
    }

    /// Logs returned for any pod whose name contains `sink_id`.
    pub fn set_logs(&self, sink_id: &str, logs: impl Into<String>) {
        self.state
            .lock()
            .unwrap()
            .logs
            .insert(sink_id.to_string(), logs.into());
    }
}

#[async_trait]
impl ClusterPort for FakeCluster {
    async fn list_collectors(&self) -> Result<Vec<CollectorPod>> {
        let state = self.state.lock().unwrap();
        if state.fail_list {
            bail!("cluster unreachable");
        }
        Ok(state.pods.clone())
    }

    async fn apply_manifest(&self, manifest: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.applies += 1;
        if state.fail_apply {
            bail!("apply rejected");
        }
        if let Some(name) = deployment_name(manifest) {
            state.pods.push(CollectorPod::new(format!("{name}-6d5f8-abcde")));
        }
        Ok(())
    }

    async fn delete_manifest(&self, manifest: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.deletes += 1;
        if let Some(name) = deployment_name(manifest) {
            if state.linger_on_delete {
                for pod in state.pods.iter_mut().filter(|pod| pod.name.starts_with(&name)) {
                    pod.terminating = true;
                }
            } else {
                state.pods.retain(|pod| !pod.name.starts_with(&name));
            }
        }
        Ok(())
    }

    async fn collector_logs(&self, pod: &str, _tail_lines: i64) -> Result<String> {
        let state = self.state.lock().unwrap();
        Ok(state
            .logs
            .iter()
            .find(|(sink_id, _)| pod.contains(sink_id.as_str()))
            .map(|(_, logs)| logs.clone())
            .unwrap_or_default())
    }
}

#[derive(Clone, Default)]
pub struct FakeRegistry {
    sinks: Arc<Mutex<Vec<SinkRecord>>>,
    fail: Arc<Mutex<bool>>,
}

impl FakeRegistry {
    pub fn new(sinks: Vec<SinkRecord>) -> Self {
        Self {
            sinks: Arc::new(Mutex::new(sinks)),
            fail: Arc::default(),
        }
    }

    pub fn fail(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }
}

#[async_trait]
impl SinkRegistryPort for FakeRegistry {
    async fn retrieve_sinks(&self, _filter: &SinkFilter) -> Result<Vec<SinkRecord>> {
        if *self.fail.lock().unwrap() {
            bail!("sinks service unavailable");
        }
        Ok(self.sinks.lock().unwrap().clone())
    }
}
