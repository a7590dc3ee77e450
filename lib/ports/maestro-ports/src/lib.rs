//! Ports between the orchestration engine and the outside world.

pub mod cluster;
pub mod event_log;
pub mod memory;
pub mod registry;
pub mod store;

pub use cluster::{ClusterPort, CollectorPod};
pub use event_log::{ConsumerGroup, EventLogPort, ReadPosition, StreamEntry};
pub use memory::{InMemoryEntryStore, InMemoryEventLog, InMemorySinkStateStore};
pub use registry::{SinkFilter, SinkRegistryPort};
pub use store::{DeploymentEntryPort, SinkStatePort, SinkStatus};
