use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::manifest::{self, ManifestSettings};
use crate::sink::{CollectorSpec, ExporterBackend};

/// Rendered manifest for one sink plus the inputs it was rendered from.
///
/// Credentials other than the username are kept only inside the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentEntry {
    pub sink_id: String,
    pub owner_id: String,
    #[serde(default)]
    pub backend: ExporterBackend,
    pub endpoint: String,
    pub username: String,
    pub broker: String,
    pub manifest: String,
    pub rendered_at: DateTime<Utc>,
}

impl DeploymentEntry {
    pub fn render(
        owner_id: &str,
        spec: &CollectorSpec,
        settings: &ManifestSettings,
    ) -> Result<Self> {
        let manifest = manifest::render(spec, settings)?;
        Ok(Self {
            sink_id: spec.sink_id.clone(),
            owner_id: owner_id.to_string(),
            backend: spec.backend,
            endpoint: spec.endpoint.clone(),
            username: spec.username.clone(),
            broker: settings.broker.clone(),
            manifest,
            rendered_at: Utc::now(),
        })
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to encode deployment entry")
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("failed to decode deployment entry")
    }
}
