//! Problem watchdog
//!
//! Between polls the waiter asks the watchdog whether the cluster shows a
//! known failure signature (crash-looping control plane, disk pressure,
//! kubelet config errors, ...). Problems are logged, capped to a few lines,
//! and followed by one cooldown sleep, so a loop retrying every few hundred
//! milliseconds against a stuck cluster does not repeat the same diagnostics
//! on every attempt. The watchdog never decides pass or fail.
//!
//! Problem finders run node commands synchronously, so a scan runs on the
//! blocking pool under a deadline. A scan that overruns is reported as a
//! problem of its own.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::command::{run_blocking, CommandRunner};
use crate::config::{ClusterConfig, ThrottleConfig, DEFAULT_COMMAND_TIMEOUT_MS};

/// Subsystem a problem was detected in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProblemSource {
    /// Container runtime / component container logs
    Runtime,
    /// Bootstrapper / node agent logs
    Bootstrapper,
    /// Executing a diagnostic command failed
    Command,
}

impl fmt::Display for ProblemSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProblemSource::Runtime => "runtime",
            ProblemSource::Bootstrapper => "bootstrapper",
            ProblemSource::Command => "command",
        };
        f.write_str(s)
    }
}

/// A detected failure description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    /// Where it was found
    pub source: ProblemSource,
    /// What was found, typically the offending log line
    pub message: String,
}

impl Problem {
    /// Create a problem
    pub fn new(source: ProblemSource, message: impl Into<String>) -> Self {
        Self {
            source,
            message: message.into(),
        }
    }
}

/// Ordered problems found in one watchdog cycle
pub type ProblemSet = Vec<Problem>;

/// Container runtime manager, as far as problem finding needs it
pub trait ContainerRuntime: Send + Sync {
    /// Runtime name for log fields (e.g. "containerd")
    fn name(&self) -> &str;

    /// Command that prints the last `lines` log lines of the newest container
    /// named `component`, succeeding with no output when there is none
    fn component_logs_command(&self, component: &str, lines: usize) -> Vec<String>;
}

/// Cluster bootstrapper, as far as problem finding needs it
pub trait Bootstrapper: Send + Sync {
    /// Bootstrapper name for log fields (e.g. "kubeadm")
    fn name(&self) -> &str;

    /// Command that prints the last `lines` lines of the node agent's log
    fn agent_logs_command(&self, lines: usize) -> Vec<String>;
}

/// Source of known failure signatures
pub trait ProblemFinder: Send + Sync {
    /// Look for problems; an empty set means nothing known is wrong
    fn find_problems(
        &self,
        runtime: &dyn ContainerRuntime,
        bootstrapper: &dyn Bootstrapper,
        cluster: &ClusterConfig,
        runner: &dyn CommandRunner,
    ) -> ProblemSet;
}

/// Log up to `cap` problems
pub fn output_problems(problems: &[Problem], cap: usize) {
    for problem in problems.iter().take(cap) {
        warn!(source = %problem.source, "problem detected: {}", problem.message);
    }
    if problems.len() > cap {
        info!(
            shown = cap,
            total = problems.len(),
            "additional problems suppressed"
        );
    }
}

/// Report `problems` and cool down
///
/// Returns the cooldown that was slept, or `None` when `problems` is empty and
/// control returned immediately.
pub async fn announce_problems(
    problems: &[Problem],
    cluster: &ClusterConfig,
    throttle: &ThrottleConfig,
) -> Option<Duration> {
    if problems.is_empty() {
        return None;
    }

    output_problems(problems, throttle.display_cap);

    let cooldown = throttle.cooldown();
    info!(
        cluster = %cluster.name,
        problems = problems.len(),
        cooldown_ms = cooldown.as_millis() as u64,
        "slowing down polling"
    );
    tokio::time::sleep(cooldown).await;
    Some(cooldown)
}

/// A problem finder bundled with its collaborators
#[derive(Clone)]
pub struct Watchdog {
    finder: Arc<dyn ProblemFinder>,
    runtime: Arc<dyn ContainerRuntime>,
    bootstrapper: Arc<dyn Bootstrapper>,
    cluster: ClusterConfig,
    throttle: ThrottleConfig,
    command_timeout: Duration,
}

impl Watchdog {
    /// Create a watchdog
    pub fn new(
        finder: Arc<dyn ProblemFinder>,
        runtime: Arc<dyn ContainerRuntime>,
        bootstrapper: Arc<dyn Bootstrapper>,
        cluster: ClusterConfig,
        throttle: ThrottleConfig,
    ) -> Self {
        Self {
            finder,
            runtime,
            bootstrapper,
            cluster,
            throttle,
            command_timeout: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS),
        }
    }

    /// Bound each problem scan by `timeout`
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Throttle settings in use
    pub fn throttle(&self) -> &ThrottleConfig {
        &self.throttle
    }

    /// Ask the finder for problems on the blocking pool
    pub async fn find_problems(&self, runner: Arc<dyn CommandRunner>) -> ProblemSet {
        let finder = self.finder.clone();
        let runtime = self.runtime.clone();
        let bootstrapper = self.bootstrapper.clone();
        let cluster = self.cluster.clone();

        let scan = run_blocking("problem scan", self.command_timeout, move || {
            finder.find_problems(
                runtime.as_ref(),
                bootstrapper.as_ref(),
                &cluster,
                runner.as_ref(),
            )
        });
        match scan.await {
            Ok(problems) => problems,
            Err(e) => {
                warn!(error = %e, "problem scan failed");
                vec![Problem::new(ProblemSource::Command, e.to_string())]
            }
        }
    }

    /// Run one watchdog cycle: find problems, then [`announce_problems`]
    pub async fn check_and_throttle(&self, runner: Arc<dyn CommandRunner>) -> Option<Duration> {
        let problems = self.find_problems(runner).await;
        announce_problems(&problems, &self.cluster, &self.throttle).await
    }
}
