//! Wait configuration
//!
//! Everything here has a default, so an empty YAML document (or no file at
//! all) is a valid configuration. The CLI layers its flags on top.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Default per-component deadline
pub const DEFAULT_TIMEOUT_SECS: u64 = 360;
/// Base interval between API retries; also the unit of the watchdog cooldown
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 500;
/// Watchdog cooldown as a multiple of the retry interval
pub const DEFAULT_COOLDOWN_MULTIPLIER: u32 = 15;
/// Most problems shown per watchdog cycle
pub const DEFAULT_PROBLEM_DISPLAY_CAP: usize = 5;
/// Log lines scanned per source when looking for problems
pub const DEFAULT_LOG_LINES: usize = 60;
/// How long a component may be waited on before the watchdog starts looking
pub const DEFAULT_MIN_LOG_CHECK_SECS: u64 = 60;
/// Upper bound on a single node command
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 30_000;

/// Throttling applied by the problem watchdog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ThrottleConfig {
    /// Base retry interval in milliseconds
    pub base_interval_ms: u64,
    /// Cooldown length as a multiple of the base interval
    pub cooldown_multiplier: u32,
    /// Maximum number of problems logged per cycle
    pub display_cap: usize,
    /// Seconds into a wait before problems are looked for at all
    pub min_log_check_secs: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            cooldown_multiplier: DEFAULT_COOLDOWN_MULTIPLIER,
            display_cap: DEFAULT_PROBLEM_DISPLAY_CAP,
            min_log_check_secs: DEFAULT_MIN_LOG_CHECK_SECS,
        }
    }
}

impl ThrottleConfig {
    /// Delay inserted after a cycle that found problems
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.base_interval_ms).saturating_mul(self.cooldown_multiplier)
    }

    /// Time into a wait before the watchdog is first consulted
    ///
    /// Fresh nodes log transient errors (no CNI yet, pods restarting) that
    /// are only worth reporting once a wait has dragged on.
    pub fn min_log_check(&self) -> Duration {
        Duration::from_secs(self.min_log_check_secs)
    }
}

/// Identity of the cluster being verified, passed through to problem finders
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClusterConfig {
    /// Cluster name, used in log fields
    pub name: String,
    /// Kubernetes version the cluster was bootstrapped with, if known
    pub kubernetes_version: Option<String>,
    /// CRI endpoint for `crictl`, when not the runtime default
    pub runtime_endpoint: Option<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: "kubernetes".to_string(),
            kubernetes_version: None,
            runtime_endpoint: None,
        }
    }
}

/// Configuration for the readiness waiter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WaitConfig {
    /// Deadline per component, in seconds
    pub timeout_secs: u64,
    /// First delay between polls, in milliseconds
    pub poll_interval_ms: u64,
    /// Upper bound on the delay between polls, in milliseconds
    pub max_poll_interval_ms: u64,
    /// Growth factor of the poll delay
    pub backoff_multiplier: f64,
    /// Log lines scanned per source by the default problem finder
    pub log_lines: usize,
    /// Deadline for a single node command, in milliseconds
    pub command_timeout_ms: u64,
    /// Watchdog throttling
    pub throttle: ThrottleConfig,
    /// Cluster identity
    pub cluster: ClusterConfig,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            max_poll_interval_ms: 10_000,
            backoff_multiplier: 2.0,
            log_lines: DEFAULT_LOG_LINES,
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            throttle: ThrottleConfig::default(),
            cluster: ClusterConfig::default(),
        }
    }
}

impl WaitConfig {
    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate YAML configuration
    pub fn from_yaml(content: &str) -> Result<Self, Error> {
        // an empty document deserializes as unit, not as an empty mapping
        let config: WaitConfig = if content.trim().is_empty() {
            WaitConfig::default()
        } else {
            serde_yaml::from_str(content)
                .map_err(|e| Error::config(format!("invalid wait configuration: {}", e)))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the waiter cannot work with
    pub fn validate(&self) -> Result<(), Error> {
        if self.timeout_secs == 0 {
            return Err(Error::config("timeoutSecs must be greater than 0"));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::config("pollIntervalMs must be greater than 0"));
        }
        if self.max_poll_interval_ms < self.poll_interval_ms {
            return Err(Error::config(
                "maxPollIntervalMs must not be smaller than pollIntervalMs",
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(Error::config("backoffMultiplier must be at least 1.0"));
        }
        if self.command_timeout_ms == 0 {
            return Err(Error::config("commandTimeoutMs must be greater than 0"));
        }
        Ok(())
    }

    /// Per-component deadline
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// First delay between polls
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Upper bound on the delay between polls
    pub fn max_poll_interval(&self) -> Duration {
        Duration::from_millis(self.max_poll_interval_ms)
    }

    /// Deadline for a single node command
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}
