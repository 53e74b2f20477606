//! Poll delay schedule with exponential backoff and jitter
//!
//! The waiter starts polling quickly, since most components come up within
//! seconds of bootstrap, and backs off towards a ceiling for slow ones.
//! Jitter keeps several waiters against the same API server from polling
//! in lockstep.

use std::time::Duration;

use rand::Rng;

use crate::config::WaitConfig;

/// Settings for a [`Backoff`] schedule
#[derive(Clone, Debug, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Ceiling for the un-jittered delay
    pub max_delay: Duration,
    /// Growth factor per attempt
    pub multiplier: f64,
    /// Whether to scale each delay by a random factor in 0.5..1.5
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl From<&WaitConfig> for BackoffConfig {
    fn from(config: &WaitConfig) -> Self {
        Self {
            initial_delay: config.poll_interval(),
            max_delay: config.max_poll_interval(),
            multiplier: config.backoff_multiplier,
            jitter: true,
        }
    }
}

/// Stateful delay schedule for one wait
#[derive(Clone, Debug)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
    attempt: u32,
}

impl Backoff {
    /// Start a new schedule
    ///
    /// A multiplier below 1.0 or not finite is treated as 1.0 (fixed delay).
    pub fn new(mut config: BackoffConfig) -> Self {
        if !config.multiplier.is_finite() || config.multiplier < 1.0 {
            config.multiplier = 1.0;
        }
        Self {
            current: config.initial_delay,
            config,
            attempt: 0,
        }
    }

    /// Number of delays handed out so far
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The next delay to sleep
    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;
        let base = self.current;

        // Exponential backoff, capped at max_delay
        self.current = Duration::try_from_secs_f64(
            (self.current.as_secs_f64() * self.config.multiplier)
                .min(self.config.max_delay.as_secs_f64()),
        )
        .unwrap_or(self.config.max_delay);

        if self.config.jitter {
            let factor = rand::thread_rng().gen_range(0.5..1.5);
            Duration::from_secs_f64(base.as_secs_f64() * factor)
        } else {
            base
        }
    }
}
