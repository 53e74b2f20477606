//! Readiness of a freshly created kind cluster
//!
//! kind nodes are containers, so node commands go through `docker exec` the
//! same way the binary does with `--node-container`.

use std::sync::Arc;

use clusterwait::agent::{kubelet_status, AgentState};
use clusterwait::cluster::{ClusterApi, KubeClusterApi};
use clusterwait::command::ProcessRunner;
use clusterwait::pods::expected_components_running;
use clusterwait::problems::{Crictl, Kubeadm, LogProblemFinder};
use clusterwait::watchdog::Watchdog;
use clusterwait::{ComponentSet, ReadinessWaiter, WaitConfig};

use super::helpers::{control_plane_container, ensure_test_cluster};

fn waiter(api: KubeClusterApi) -> ReadinessWaiter {
    let config = WaitConfig {
        timeout_secs: 300,
        ..Default::default()
    };
    let watchdog = Watchdog::new(
        Arc::new(LogProblemFinder::new(config.log_lines)),
        Arc::new(Crictl::new()),
        Arc::new(Kubeadm),
        config.cluster.clone(),
        config.throttle.clone(),
    )
    .with_command_timeout(config.command_timeout());
    ReadinessWaiter::new(
        Arc::new(api),
        Arc::new(ProcessRunner::docker_exec(control_plane_container())),
        watchdog,
        config,
    )
}

/// A new cluster eventually has a running kubelet and API server, runs every
/// core workload and creates the default service account
#[tokio::test]
#[ignore = "requires docker and kind"]
async fn new_cluster_becomes_ready() {
    let client = ensure_test_cluster().await.expect("test cluster");
    let waiter = waiter(KubeClusterApi::new(client.clone()));

    let components = ComponentSet::from_wait_flag(&["apiserver", "system_pods", "default_sa"][..]);
    waiter
        .wait_for(&components)
        .await
        .expect("cluster should become ready");

    // once ready, a single check passes without polling
    expected_components_running(&KubeClusterApi::new(client))
        .await
        .expect("system pods should stay running");
}

#[tokio::test]
#[ignore = "requires docker and kind"]
async fn server_version_is_reported() {
    let client = ensure_test_cluster().await.expect("test cluster");
    let version = KubeClusterApi::new(client)
        .server_version()
        .await
        .expect("server version");
    assert!(version.starts_with('v'), "unexpected version {version}");
}

/// The kubelet probe reaches the node through `docker exec`
#[tokio::test]
#[ignore = "requires docker and kind"]
async fn kubelet_probe_runs_inside_the_node_container() {
    ensure_test_cluster().await.expect("test cluster");
    let runner = ProcessRunner::docker_exec(control_plane_container());

    let probe = kubelet_status(&runner);
    assert_eq!(probe.state, AgentState::Running, "fault: {:?}", probe.fault);
    assert!(probe.fault.is_none());
}
