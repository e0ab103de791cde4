//! Coordinator-wide configuration: how much the forward scheduler is
//! allowed to fan out, and how compensation retries back off.
//!
//! Shaped like the teacher's `Config`/`RetryConfig`: a `Default` impl plus
//! environment-variable overrides, rather than a config file — this crate
//! is a library embedded by a host process, not a standalone service.

use std::env;
use std::time::Duration;

use crate::policy::ForwardRecoveryConfig;

/// Tunables for a [`crate::saga::Saga`] run.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Caps how many nodes the forward scheduler may have in flight at
    /// once. `None` (the default) means unbounded: every node in the
    /// widest ready antichain is dispatched concurrently, per the
    /// concurrency model's requirement.
    pub max_concurrency: Option<usize>,
    /// Backoff for the built-in [`crate::policy::ForwardRecovery`] policy.
    pub forward_recovery: ForwardRecoveryConfig,
    /// Backoff for compensation retries, which are unconditional and
    /// policy-independent (see `DESIGN.md`).
    pub compensation_retry: CompensationRetryConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            forward_recovery: ForwardRecoveryConfig::default(),
            compensation_retry: CompensationRetryConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Start from [`Default`] and apply any `WYRD_*` environment overrides
    /// present in the process environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("WYRD_MAX_CONCURRENCY") {
            if let Ok(n) = v.parse::<usize>() {
                self.max_concurrency = Some(n);
            }
        }
        if let Ok(v) = env::var("WYRD_COMPENSATION_MAX_ATTEMPTS") {
            if let Ok(n) = v.parse::<u32>() {
                self.compensation_retry.max_attempts = Some(n);
            }
        }
        if let Ok(v) = env::var("WYRD_COMPENSATION_BASE_DELAY_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                self.compensation_retry.base_delay = Duration::from_millis(ms);
            }
        }
    }
}

/// Backoff for compensation retries (see [`crate::compensation`]).
#[derive(Debug, Clone)]
pub struct CompensationRetryConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// `None` retries forever, matching the spec's mandate that
    /// compensation failures are retried until they succeed. `Some(n)`
    /// lets a deployment flag exhaustion as a system-level incident
    /// instead (see `CoordinatorError::Compensation`).
    pub max_attempts: Option<u32>,
}

impl Default for CompensationRetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(2),
            max_attempts: None,
        }
    }
}
