//! Domain models and invariants.

pub mod config;
pub mod deployment;
pub mod error;
pub mod events;
pub mod health;
pub mod manifest;
pub mod sink;

pub use config::{
    ClusterConfig, ConsumerConfig, GrpcConfig, MaestroConfig, MonitorConfig, RedisConfig,
};
pub use deployment::DeploymentEntry;
pub use error::DecodeError;
pub use events::{
    EventFields, SinkActivity, SinkChange, SinkerEvent, SinkerUpdateEvent, SinksEvent,
};
pub use health::HealthState;
pub use manifest::ManifestSettings;
pub use sink::{CollectorSpec, ExporterBackend, SinkRecord};
