//! Kubernetes API access used by the readiness checks
//!
//! The checks only need three reads, so they go through the narrow
//! [`ClusterApi`] trait instead of a raw `kube::Client`. This keeps the
//! checks testable with `MockClusterApi`.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, ServiceAccount};
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::Error;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Read-only cluster queries needed by the readiness checks
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// List every pod in `namespace`
    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, Error>;

    /// The API server's reported version (e.g. "v1.32.0")
    async fn server_version(&self) -> Result<String, Error>;

    /// Whether the service account `name` exists in `namespace`
    async fn service_account_exists(&self, namespace: &str, name: &str) -> Result<bool, Error>;
}

/// [`ClusterApi`] backed by a kube-rs client
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    /// Wrap an already-authenticated client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, Error> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods.list(&ListParams::default()).await?;
        debug!(namespace = %namespace, count = list.items.len(), "Listed pods");
        Ok(list.items)
    }

    async fn server_version(&self) -> Result<String, Error> {
        let info = self.client.apiserver_version().await?;
        Ok(info.git_version)
    }

    async fn service_account_exists(&self, namespace: &str, name: &str) -> Result<bool, Error> {
        let accounts: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        Ok(accounts.get_opt(name).await?.is_some())
    }
}

/// Create a kube client from an optional kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    create_client_with_timeout(kubeconfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a kube client from an optional kubeconfig path with custom timeouts
///
/// Without a path the usual inference applies (`KUBECONFIG`, `~/.kube/config`,
/// then in-cluster service account).
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::client_with_context(
                    "read_kubeconfig",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::client_with_context(
                        "load_kubeconfig",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::client_with_context("infer", format!("failed to infer config: {}", e))
        })?,
    };

    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);

    Client::try_from(config).map_err(|e| {
        Error::client_with_context("create_client", format!("failed to create client: {}", e))
    })
}
