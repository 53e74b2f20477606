//! clusterwait - readiness verification for freshly bootstrapped Kubernetes clusters
//!
//! After a bootstrapper (kubeadm or similar) brings up a control plane, a
//! provisioning tool usually needs to know when the cluster is actually usable.
//! clusterwait answers that by polling a small set of components until each one
//! is healthy, while a watchdog scans node logs for known failure signatures
//! and slows the polling down when the cluster is visibly stuck.
//!
//! # Components
//!
//! - `apiserver` - the kubelet is running and the API server answers
//! - `system_pods` - every core kube-system workload has a Running pod
//! - `default_sa` - the `default` service account has been created
//!
//! # Modules
//!
//! - [`components`] - Component keys, selection sets and `--wait` parsing
//! - [`pods`] - Core workload pod checks
//! - [`agent`] - Node agent (kubelet) status probing
//! - [`watchdog`] - Problem reporting and cooldown throttling
//! - [`problems`] - Default log-signature problem finder, crictl and kubeadm
//! - [`wait`] - The readiness waiter poll loop
//! - [`backoff`] - Poll delay schedule
//! - [`cluster`] - Kubernetes API access and client construction
//! - [`command`] - Running commands on the node
//! - [`config`] - Waiter configuration
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod agent;
pub mod backoff;
pub mod cluster;
pub mod command;
pub mod components;
pub mod config;
pub mod error;
pub mod pods;
pub mod problems;
pub mod wait;
pub mod watchdog;

pub use components::{Component, ComponentSet};
pub use config::WaitConfig;
pub use error::Error;
pub use wait::ReadinessWaiter;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace holding the control plane and core addon pods
pub const SYSTEM_NAMESPACE: &str = "kube-system";

/// Namespace checked for the default service account
pub const DEFAULT_NAMESPACE: &str = "default";

/// Service account the controller manager creates in every namespace
pub const DEFAULT_SERVICE_ACCOUNT: &str = "default";
