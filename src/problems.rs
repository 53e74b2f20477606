//! Default problem finder and collaborators
//!
//! [`LogProblemFinder`] scans the tail of the kubelet journal and of each
//! control plane container's log for well-known failure lines, matched as
//! plain substrings. Callers with a richer log pipeline plug in their own
//! [`ProblemFinder`].

use tracing::debug;

use crate::command::{argv, render, shell_quote, CommandError, CommandRunner};
use crate::config::ClusterConfig;
use crate::watchdog::{
    Bootstrapper, ContainerRuntime, Problem, ProblemFinder, ProblemSet, ProblemSource,
};

/// Control plane containers whose logs are scanned
pub const LOGGED_COMPONENTS: &[&str] = &[
    "kube-apiserver",
    "etcd",
    "coredns",
    "kube-scheduler",
    "kube-proxy",
    "kube-controller-manager",
];

/// Lines in component container logs that indicate a known failure
pub const RUNTIME_SIGNATURES: &[&str] = &[
    "address already in use",
    "no space left on device",
    "permission denied",
    "x509: certificate",
    "panic:",
    "Error while dialing",
];

/// Lines in the kubelet journal that indicate a known failure
pub const AGENT_SIGNATURES: &[&str] = &[
    "failed to run Kubelet",
    "Failed to start ContainerManager",
    "failed to load kubelet config file",
    "Back-off restarting failed container",
    "eviction manager: attempting to reclaim",
    "Container runtime network not ready",
];

/// `crictl`-based container runtime
#[derive(Debug, Clone, Default)]
pub struct Crictl {
    runtime_endpoint: Option<String>,
}

impl Crictl {
    /// Use crictl's configured endpoint
    pub fn new() -> Self {
        Self::default()
    }

    /// Talk to the CRI socket at `endpoint`
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            runtime_endpoint: Some(endpoint.into()),
        }
    }

    fn crictl(&self) -> String {
        match &self.runtime_endpoint {
            Some(endpoint) => format!("crictl --runtime-endpoint {}", shell_quote(endpoint)),
            None => "crictl".to_string(),
        }
    }
}

impl ContainerRuntime for Crictl {
    fn name(&self) -> &str {
        "cri"
    }

    fn component_logs_command(&self, component: &str, lines: usize) -> Vec<String> {
        let crictl = self.crictl();
        let component = shell_quote(component);
        let script = format!(
            "id=$({crictl} ps -a --quiet --name {component} | head -n 1); \
             [ -z \"$id\" ] || {crictl} logs --tail {lines} \"$id\" 2>&1"
        );
        argv(&["sudo", "sh", "-c", &script])
    }
}

/// kubeadm-bootstrapped node with a systemd-managed kubelet
#[derive(Debug, Clone, Copy, Default)]
pub struct Kubeadm;

impl Bootstrapper for Kubeadm {
    fn name(&self) -> &str {
        "kubeadm"
    }

    fn agent_logs_command(&self, lines: usize) -> Vec<String> {
        let lines = lines.to_string();
        argv(&["sudo", "journalctl", "-u", "kubelet", "-n", &lines, "--no-pager"])
    }
}

/// Finds problems by matching log lines against known signatures
#[derive(Debug, Clone)]
pub struct LogProblemFinder {
    lines: usize,
}

impl LogProblemFinder {
    /// Scan the last `lines` lines of every source
    pub fn new(lines: usize) -> Self {
        Self { lines }
    }

    /// Run `cmd` and return its stdout
    ///
    /// A command that ran but failed is treated as "no logs yet" (containers
    /// that have not been created are the common case while bootstrapping).
    /// A command that could not start at all is itself a problem.
    fn collect(
        &self,
        runner: &dyn CommandRunner,
        cmd: &[String],
        problems: &mut ProblemSet,
    ) -> Option<String> {
        match runner.run_cmd(cmd) {
            Ok(output) => Some(output.stdout),
            Err(e @ CommandError::Spawn { .. }) => {
                push_unique(problems, Problem::new(ProblemSource::Command, e.to_string()));
                None
            }
            Err(e) => {
                debug!(command = %render(cmd), error = %e, "log command failed, skipping");
                None
            }
        }
    }
}

impl Default for LogProblemFinder {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_LOG_LINES)
    }
}

impl ProblemFinder for LogProblemFinder {
    fn find_problems(
        &self,
        runtime: &dyn ContainerRuntime,
        bootstrapper: &dyn Bootstrapper,
        cluster: &ClusterConfig,
        runner: &dyn CommandRunner,
    ) -> ProblemSet {
        let mut problems = ProblemSet::new();

        for component in LOGGED_COMPONENTS {
            let cmd = runtime.component_logs_command(component, self.lines);
            if let Some(logs) = self.collect(runner, &cmd, &mut problems) {
                for line in matching_lines(&logs, RUNTIME_SIGNATURES) {
                    push_unique(
                        &mut problems,
                        Problem::new(ProblemSource::Runtime, format!("{}: {}", component, line)),
                    );
                }
            }
        }

        let cmd = bootstrapper.agent_logs_command(self.lines);
        if let Some(logs) = self.collect(runner, &cmd, &mut problems) {
            for line in matching_lines(&logs, AGENT_SIGNATURES) {
                push_unique(&mut problems, Problem::new(ProblemSource::Bootstrapper, line));
            }
        }

        debug!(
            cluster = %cluster.name,
            runtime = %runtime.name(),
            bootstrapper = %bootstrapper.name(),
            found = problems.len(),
            "scanned logs for problems"
        );
        problems
    }
}

/// Trimmed lines of `logs` containing any of `signatures`
pub fn matching_lines<'a>(
    logs: &'a str,
    signatures: &'a [&'a str],
) -> impl Iterator<Item = &'a str> {
    logs.lines()
        .map(str::trim)
        .filter(move |line| signatures.iter().any(|sig| line.contains(sig)))
}

fn push_unique(problems: &mut ProblemSet, problem: Problem) {
    if !problems.contains(&problem) {
        problems.push(problem);
    }
}
