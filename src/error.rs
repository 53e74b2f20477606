//! Error types for cluster readiness checks
//!
//! Every failure is a value returned to the caller. Nothing here retries or
//! terminates the process; the waiter uses [`Error::is_retryable`] to decide
//! whether another poll is worthwhile.

use std::time::Duration;

use thiserror::Error;

use crate::agent::AgentState;
use crate::command::CommandError;

/// Main error type for readiness operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error (listing pods, reading the server version, ...)
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Pods were listed but some expected workloads are not Running
    #[error("missing components: {}", missing.join(", "))]
    MissingComponents {
        /// Expected workload names with no Running pod, in expected-list order
        missing: Vec<String>,
    },

    /// A command on the node could not be executed or exited non-zero
    #[error(transparent)]
    Command(#[from] CommandError),

    /// The node agent answered, but not with "running"
    #[error("kubelet is not running: {state}")]
    AgentNotRunning {
        /// State classified from the agent's status output
        state: AgentState,
    },

    /// A service account the cluster should create on its own is absent
    #[error("service account {namespace}/{name} not found")]
    ServiceAccountMissing {
        /// Namespace that was checked
        namespace: String,
        /// Service account name
        name: String,
    },

    /// A component did not become ready before its deadline
    #[error("timed out after {waited:?} waiting for {component}: {last_error}")]
    Timeout {
        /// Component name (one of the wait keys)
        component: String,
        /// How long the waiter polled
        waited: Duration,
        /// The last check failure observed
        last_error: String,
    },

    /// Invalid or unreadable configuration
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's invalid
        message: String,
    },

    /// The kube client could not be constructed
    #[error("client error [{context}]: {message}")]
    Client {
        /// Description of what failed
        message: String,
        /// Where construction failed (e.g., "read_kubeconfig", "infer")
        context: String,
    },
}

impl Error {
    /// Create a missing-components error
    pub fn missing_components(missing: Vec<String>) -> Self {
        Self::MissingComponents { missing }
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a client construction error with context
    pub fn client_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Client {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if polling again could plausibly change the outcome
    ///
    /// Configuration and client construction errors need a fix from the
    /// caller. Everything observed from a live cluster may change.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { .. } => true,
            Error::MissingComponents { .. } => true,
            Error::Command(_) => true,
            Error::AgentNotRunning { .. } => true,
            Error::ServiceAccountMissing { .. } => true,
            Error::Timeout { .. } => false,
            Error::Config { .. } => false,
            Error::Client { .. } => false,
        }
    }

    /// Names of the missing workloads, if this is a missing-components error
    pub fn missing(&self) -> Option<&[String]> {
        match self {
            Error::MissingComponents { missing } => Some(missing),
            _ => None,
        }
    }
}
