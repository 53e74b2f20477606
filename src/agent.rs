//! Node agent (kubelet) status probing
//!
//! The probe asks the node's service manager whether a unit is active and
//! classifies the answer. Running the command and classifying its output are
//! kept apart: `systemctl is-active` exits non-zero for every state except
//! `active`, yet still prints a valid state. An [`AgentProbe`] therefore
//! carries both the classified state and the execution fault, if any.

use std::fmt;

use tracing::{info, warn};

use crate::command::{argv, render, CommandError, CommandRunner};

/// Systemd unit of the node agent
pub const KUBELET_SERVICE: &str = "kubelet";

/// Lifecycle state of a node agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// The unit is active
    Running,
    /// The unit is inactive
    Stopped,
    /// The unit is starting up
    Starting,
    /// Anything else, including failures and unknown units
    Error,
}

impl AgentState {
    /// Classify trimmed `systemctl is-active` output
    ///
    /// Only the three exact tokens are recognized; everything else, including
    /// an empty string, is `Error`.
    pub fn from_is_active(token: &str) -> Self {
        match token {
            "active" => AgentState::Running,
            "inactive" => AgentState::Stopped,
            "activating" => AgentState::Starting,
            _ => AgentState::Error,
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentState::Running => "Running",
            AgentState::Stopped => "Stopped",
            AgentState::Starting => "Starting",
            AgentState::Error => "Error",
        };
        f.write_str(s)
    }
}

/// Outcome of an agent status probe
///
/// `fault` is set whenever the status command reported an error, even if a
/// state was still classified from its output. Inspect `state` on its own.
#[derive(Debug)]
pub struct AgentProbe {
    /// Classified agent state
    pub state: AgentState,
    /// Execution error reported by the command runner, if any
    pub fault: Option<CommandError>,
}

impl AgentProbe {
    /// Whether the agent was classified as running
    pub fn is_running(&self) -> bool {
        self.state == AgentState::Running
    }

    /// Split into the `(state, error)` pair
    pub fn into_parts(self) -> (AgentState, Option<CommandError>) {
        (self.state, self.fault)
    }
}

/// Check the kubelet status
pub fn kubelet_status<R>(runner: &R) -> AgentProbe
where
    R: CommandRunner + ?Sized,
{
    agent_status(runner, KUBELET_SERVICE)
}

/// Check the status of the systemd unit `service`
pub fn agent_status<R>(runner: &R, service: &str) -> AgentProbe
where
    R: CommandRunner + ?Sized,
{
    info!(service = %service, "Checking agent status ...");
    let cmd = argv(&["sudo", "systemctl", "is-active", service]);

    let (stdout, fault) = match runner.run_cmd(&cmd) {
        Ok(output) => (output.stdout, None),
        Err(e) => {
            // keep going: a failed status command may still have printed the state
            warn!(command = %render(&cmd), error = %e, "status command returned error");
            let stdout = e.output().map(|o| o.stdout.clone()).unwrap_or_default();
            (stdout, Some(e))
        }
    };

    let token = stdout.trim();
    info!(service = %service, status = %token, "is-active");

    AgentProbe {
        state: AgentState::from_is_active(token),
        fault,
    }
}
