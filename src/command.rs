//! Command execution on the cluster node
//!
//! Status probes and log scans run shell commands on the node. The
//! [`CommandRunner`] trait is the seam: production code uses
//! [`ProcessRunner`], tests use the generated `MockCommandRunner`.
//!
//! A non-zero exit is an error, but it still carries the captured output.
//! Some agents exit non-zero while printing a perfectly valid status
//! (`systemctl is-active` exits 3 with `inactive`), so callers can keep
//! parsing after a failure.
//!
//! Runners are synchronous. Async callers go through [`run_blocking`], which
//! moves the call off the runtime's worker threads and bounds it with a
//! deadline.

use std::process::{Command, Output, Stdio};
use std::time::Duration;

#[cfg(test)]
use mockall::automock;
use thiserror::Error;
use tracing::debug;

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, if the process exited normally
    pub code: Option<i32>,
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

impl CommandOutput {
    /// Create an output for a command that exited 0
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }
    }
}

/// Command execution errors
#[derive(Debug, Error)]
pub enum CommandError {
    /// The process could not be started
    #[error("`{command}` failed to start: {source}")]
    Spawn {
        /// Rendered command line
        command: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// The process ran and exited unsuccessfully
    #[error("`{command}` exited with status {}: {}", exit_code(.code), .output.stderr.trim())]
    ExitStatus {
        /// Rendered command line
        command: String,
        /// Exit code, `None` when killed by a signal
        code: Option<i32>,
        /// Whatever the process printed before exiting
        output: CommandOutput,
    },

    /// The command did not finish within its deadline
    #[error("`{command}` did not finish within {timeout:?}")]
    TimedOut {
        /// Rendered command line, or a description of the blocking work
        command: String,
        /// The deadline that passed
        timeout: Duration,
    },

    /// The blocking task running the command panicked or was cancelled
    #[error("`{command}` aborted: {message}")]
    Aborted {
        /// Rendered command line, or a description of the blocking work
        command: String,
        /// Join error text
        message: String,
    },
}

impl CommandError {
    /// Output captured before the failure, if the process ran at all
    pub fn output(&self) -> Option<&CommandOutput> {
        match self {
            CommandError::ExitStatus { output, .. } => Some(output),
            _ => None,
        }
    }

    /// The command line that failed
    pub fn command(&self) -> &str {
        match self {
            CommandError::Spawn { command, .. } => command,
            CommandError::ExitStatus { command, .. } => command,
            CommandError::TimedOut { command, .. } => command,
            CommandError::Aborted { command, .. } => command,
        }
    }
}

fn exit_code(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "signal".to_string())
}

/// Trait for executing commands on the node (allows mocking in tests)
#[cfg_attr(test, automock)]
pub trait CommandRunner: Send + Sync {
    /// Run `argv` to completion and capture its output
    ///
    /// Returns `Err(CommandError::ExitStatus)` with the captured output when
    /// the command exits non-zero.
    fn run_cmd(&self, argv: &[String]) -> Result<CommandOutput, CommandError>;
}

/// Render an argv for logs and error messages
pub fn render(argv: &[String]) -> String {
    argv.join(" ")
}

/// Build an owned argv from string slices
pub fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

/// Quote `value` for safe interpolation into a `sh -c` script
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Run blocking work `f` on tokio's blocking pool, giving up after `timeout`
///
/// On timeout the blocking thread is left to finish on its own; the caller
/// gets [`CommandError::TimedOut`] right away.
pub async fn run_blocking<T, F>(
    what: impl Into<String>,
    timeout: Duration,
    f: F,
) -> Result<T, CommandError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let command = what.into();
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(CommandError::Aborted {
            command,
            message: e.to_string(),
        }),
        Err(_) => Err(CommandError::TimedOut { command, timeout }),
    }
}

/// Runs commands as local processes, optionally through a prefix
///
/// With an empty prefix commands run on this host. With a prefix such as
/// `docker exec <node>` they run inside a node container, which is how kind
/// and other container-backed clusters expose their nodes.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    prefix: Vec<String>,
}

impl ProcessRunner {
    /// Run commands directly on this host
    pub fn local() -> Self {
        Self::default()
    }

    /// Run commands inside a node container via `docker exec`
    pub fn docker_exec(container: impl Into<String>) -> Self {
        Self {
            prefix: vec!["docker".to_string(), "exec".to_string(), container.into()],
        }
    }

    /// The full argv that will be spawned for `argv`
    pub fn full_argv(&self, argv: &[String]) -> Vec<String> {
        self.prefix.iter().chain(argv.iter()).cloned().collect()
    }
}

impl CommandRunner for ProcessRunner {
    fn run_cmd(&self, argv: &[String]) -> Result<CommandOutput, CommandError> {
        let full = self.full_argv(argv);
        let rendered = render(&full);
        let (program, args) = full.split_first().ok_or_else(|| CommandError::Spawn {
            command: rendered.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
        })?;

        debug!(command = %rendered, "Executing command");

        // no stdin: a command waiting for input must fail, not hang
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| CommandError::Spawn {
                command: rendered.clone(),
                source,
            })?;

        let success = output.status.success();
        let output = CommandOutput::from(output);
        if success {
            Ok(output)
        } else {
            Err(CommandError::ExitStatus {
                command: rendered,
                code: output.code,
                output,
            })
        }
    }
}
