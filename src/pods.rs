//! Core workload pod checks
//!
//! A freshly bootstrapped control plane is considered minimally healthy once
//! each expected kube-system workload has at least one Running pod. Pods are
//! matched to workloads by label, using whichever of the two conventional
//! label keys the cluster happens to populate.

use std::collections::HashSet;
use std::fmt;
use std::fmt::Write as _;

use k8s_openapi::api::core::v1::Pod;
use tracing::info;

use crate::cluster::ClusterApi;
use crate::{Error, SYSTEM_NAMESPACE};

/// Workloads that must each have a Running pod, in reporting order
pub const EXPECTED_WORKLOADS: &[&str] = &[
    "kube-dns", // coredns
    "etcd",
    "kube-apiserver",
    "kube-controller-manager",
    "kube-proxy",
    "kube-scheduler",
];

/// Label keys that name the workload a pod belongs to
///
/// Static control plane pods use `component`, addon pods use `k8s-app`.
pub const WORKLOAD_LABEL_KEYS: &[&str] = &["component", "k8s-app"];

/// Coarse pod lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    /// Accepted but not all containers are running yet
    Pending,
    /// Bound to a node with at least one container running
    Running,
    /// All containers terminated successfully
    Succeeded,
    /// All containers terminated, at least one in failure
    Failed,
    /// Phase could not be determined
    Unknown,
}

impl PodPhase {
    /// Parse the phase string from a pod status
    ///
    /// A missing or unrecognized phase is `Unknown`.
    pub fn parse(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }

    /// The phase of `pod`
    pub fn of(pod: &Pod) -> Self {
        Self::parse(pod.status.as_ref().and_then(|s| s.phase.as_deref()))
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PodPhase::Pending => "Pending",
            PodPhase::Running => "Running",
            PodPhase::Succeeded => "Succeeded",
            PodPhase::Failed => "Failed",
            PodPhase::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Check that every expected workload has a Running pod in kube-system
///
/// A list failure is returned as-is; retrying is up to the caller. Every
/// observed pod is logged, Running or not.
pub async fn expected_components_running<A>(api: &A) -> Result<(), Error>
where
    A: ClusterApi + ?Sized,
{
    let pods = api.list_pods(SYSTEM_NAMESPACE).await?;

    let mut found: HashSet<&str> = HashSet::new();
    for pod in &pods {
        info!("found pod: {}", pod_status_msg(pod));
        if PodPhase::of(pod) != PodPhase::Running {
            continue;
        }
        found.extend(workload_names(pod));
    }

    let missing = missing_workloads(&found);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::missing_components(missing))
    }
}

/// Workload names a pod's labels claim it belongs to
pub fn workload_names(pod: &Pod) -> impl Iterator<Item = &str> {
    let labels = pod.metadata.labels.as_ref();
    WORKLOAD_LABEL_KEYS
        .iter()
        .filter_map(move |key| labels.and_then(|l| l.get(*key)))
        .map(String::as_str)
}

fn missing_workloads(found: &HashSet<&str>) -> Vec<String> {
    EXPECTED_WORKLOADS
        .iter()
        .filter(|name| !found.contains(*name))
        .map(|name| name.to_string())
        .collect()
}

/// One-line human-readable pod status for diagnostics
///
/// Format: `"name" [uid] Phase: Type:Reason (message) / Type:Reason ...`
pub fn pod_status_msg(pod: &Pod) -> String {
    let name = pod.metadata.name.as_deref().unwrap_or_default();
    let uid = pod.metadata.uid.as_deref().unwrap_or_default();
    let mut msg = format!("{:?} [{}] {}", name, uid, PodPhase::of(pod));

    let conditions = pod
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_deref())
        .unwrap_or_default();

    for (i, c) in conditions.iter().enumerate() {
        if let Some(reason) = c.reason.as_deref().filter(|r| !r.is_empty()) {
            msg.push_str(if i == 0 { ": " } else { " / " });
            let _ = write!(msg, "{}:{}", c.type_, reason);
        }
        if let Some(message) = c.message.as_deref().filter(|m| !m.is_empty()) {
            let _ = write!(msg, " ({})", message);
        }
    }
    msg
}
