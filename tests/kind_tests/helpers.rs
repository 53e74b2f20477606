//! Test helpers for integration tests
//!
//! Provides utilities for managing the kind cluster under test.

use std::process::Command;
use std::sync::OnceLock;

use kube::{Client, Config};

/// Name of the kind cluster used for integration tests
pub const TEST_CLUSTER_NAME: &str = "clusterwait-integration-test";

/// Global lock to ensure cluster is created only once
static CLUSTER_INIT: OnceLock<Result<(), String>> = OnceLock::new();

/// Docker container backing the control plane node
pub fn control_plane_container() -> String {
    format!("{TEST_CLUSTER_NAME}-control-plane")
}

/// Check if a kind cluster with the given name exists
pub fn kind_cluster_exists(name: &str) -> Result<bool, String> {
    let output = Command::new("kind")
        .args(["get", "clusters"])
        .output()
        .map_err(|e| format!("failed to run kind: {e}"))?;

    let clusters = String::from_utf8_lossy(&output.stdout);
    Ok(clusters.lines().any(|line| line.trim() == name))
}

/// Create a kind cluster without waiting for it to become ready
///
/// Readiness is what the tests verify, so kind's own `--wait` is not used.
pub fn create_kind_cluster(name: &str) -> Result<(), String> {
    if kind_cluster_exists(name)? {
        println!("Kind cluster '{name}' already exists, reusing it");
        return Ok(());
    }

    println!("Creating kind cluster '{name}'...");
    let output = Command::new("kind")
        .args(["create", "cluster", "--name", name])
        .output()
        .map_err(|e| format!("failed to run kind: {e}"))?;

    if !output.status.success() {
        return Err(format!(
            "failed to create kind cluster: {}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }

    println!("Kind cluster '{name}' created successfully");
    Ok(())
}

/// Create a Kubernetes client connected to the test cluster
pub async fn create_test_client() -> Result<Client, String> {
    let context_name = format!("kind-{TEST_CLUSTER_NAME}");

    let config = Config::from_kubeconfig(&kube::config::KubeConfigOptions {
        context: Some(context_name),
        ..Default::default()
    })
    .await
    .map_err(|e| format!("failed to load kubeconfig: {e}"))?;

    Client::try_from(config).map_err(|e| format!("failed to create client: {e}"))
}

/// Ensure the test cluster exists and return a fresh client for it
pub async fn ensure_test_cluster() -> Result<Client, String> {
    let cluster_result = CLUSTER_INIT.get_or_init(|| create_kind_cluster(TEST_CLUSTER_NAME));
    cluster_result.clone()?;
    create_test_client().await
}
