//! Orchestration engine: stream listeners, cluster control, health monitor
//! and the service that wires them together.

pub mod activity_listener;
pub mod cluster_control;
pub mod consumer;
pub mod log_analysis;
pub mod monitor;
pub mod service;
pub mod sinks_listener;

pub use activity_listener::ActivityListener;
pub use cluster_control::{ClusterControl, CollectorState};
pub use consumer::{Disposition, StreamConsumer, StreamHandler};
pub use log_analysis::Classification;
pub use monitor::Monitor;
pub use service::{MaestroPorts, MaestroService};
pub use sinks_listener::SinksListener;

#[cfg(test)]
mod testing;
