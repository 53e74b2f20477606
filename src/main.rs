//! clusterwait - wait for a freshly bootstrapped cluster to become usable

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use clusterwait::cluster::{create_client, KubeClusterApi};
use clusterwait::command::{CommandRunner, ProcessRunner};
use clusterwait::problems::{Crictl, Kubeadm, LogProblemFinder};
use clusterwait::watchdog::Watchdog;
use clusterwait::{ComponentSet, ReadinessWaiter, WaitConfig};

/// Wait for Kubernetes cluster components to become ready
#[derive(Parser, Debug)]
#[command(name = "clusterwait", version, about, long_about = None)]
struct Cli {
    /// Components to wait for: apiserver, system_pods, default_sa, or all/none
    ///
    /// Defaults to apiserver,system_pods.
    #[arg(long, value_delimiter = ',')]
    wait: Vec<String>,

    /// Path to the kubeconfig of the cluster to verify
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Deadline per component in seconds (overrides the config file)
    #[arg(long, env = "CLUSTERWAIT_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Run node commands inside this container via `docker exec`
    ///
    /// Without it, node commands run on this host.
    #[arg(long, env = "CLUSTERWAIT_NODE_CONTAINER")]
    node_container: Option<String>,

    /// Path to a YAML wait configuration file
    #[arg(short = 'f', long = "config")]
    config_file: Option<PathBuf>,

    /// CRI endpoint passed to crictl (overrides the config file)
    #[arg(long)]
    runtime_endpoint: Option<String>,
}

impl Cli {
    /// Load the config file, if any, and apply flag overrides
    fn wait_config(&self) -> anyhow::Result<WaitConfig> {
        let mut config = match &self.config_file {
            Some(path) => WaitConfig::load(path)?,
            None => WaitConfig::default(),
        };
        if let Some(timeout_secs) = self.timeout_secs {
            config.timeout_secs = timeout_secs;
        }
        if let Some(endpoint) = &self.runtime_endpoint {
            config.cluster.runtime_endpoint = Some(endpoint.clone());
        }
        config.validate()?;
        Ok(config)
    }

    fn runner(&self) -> ProcessRunner {
        match &self.node_container {
            Some(container) => ProcessRunner::docker_exec(container.clone()),
            None => ProcessRunner::local(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = cli.wait_config()?;
    let components = ComponentSet::from_wait_flag(&cli.wait);

    let client = create_client(cli.kubeconfig.as_deref()).await?;
    let runner: Arc<dyn CommandRunner> = Arc::new(cli.runner());

    let runtime = match &config.cluster.runtime_endpoint {
        Some(endpoint) => Crictl::with_endpoint(endpoint.clone()),
        None => Crictl::new(),
    };
    let watchdog = Watchdog::new(
        Arc::new(LogProblemFinder::new(config.log_lines)),
        Arc::new(runtime),
        Arc::new(Kubeadm),
        config.cluster.clone(),
        config.throttle.clone(),
    )
    .with_command_timeout(config.command_timeout());

    info!(
        cluster = %config.cluster.name,
        components = %components,
        timeout_secs = config.timeout_secs,
        "verifying cluster"
    );

    let waiter = ReadinessWaiter::new(
        Arc::new(KubeClusterApi::new(client)),
        runner,
        watchdog,
        config,
    );
    waiter.wait_for(&components).await?;

    Ok(())
}
