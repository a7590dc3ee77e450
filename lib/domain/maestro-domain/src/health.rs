use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Observed health of a sink's collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    #[default]
    Unknown,
    Active,
    Idle,
    Warning,
    Error,
    Provisioning,
    ProvisioningError,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Unknown => "unknown",
            HealthState::Active => "active",
            HealthState::Idle => "idle",
            HealthState::Warning => "warning",
            HealthState::Error => "error",
            HealthState::Provisioning => "provisioning",
            HealthState::ProvisioningError => "provisioning_error",
        }
    }

    /// Lenient parse used for values coming from collaborators; anything
    /// unrecognised is treated as `Unknown`.
    pub fn from_str_lossy(raw: &str) -> Self {
        raw.parse().unwrap_or_default()
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthState {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "unknown" | "" => Ok(HealthState::Unknown),
            "active" => Ok(HealthState::Active),
            "idle" => Ok(HealthState::Idle),
            "warning" => Ok(HealthState::Warning),
            "error" => Ok(HealthState::Error),
            "provisioning" => Ok(HealthState::Provisioning),
            "provisioning_error" => Ok(HealthState::ProvisioningError),
            other => anyhow::bail!("unknown health state: {other}"),
        }
    }
}
