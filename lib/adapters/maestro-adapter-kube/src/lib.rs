//! Kubernetes cluster adapter: pod queries through `kube`, manifest
//! apply/delete through `kubectl`.

pub mod kubectl;
pub mod pods;

pub use kubectl::{Kubectl, ManifestAction};
pub use pods::KubeCluster;
