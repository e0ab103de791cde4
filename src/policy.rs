//! Pluggable recovery strategy: what happens when a transaction fails.

use std::time::Duration;

use async_trait::async_trait;
use backon::{BackoffBuilder, ExponentialBuilder};
use tracing::{debug, warn};

/// What the scheduler should do about a failed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryDecision {
    /// Re-invoke the same request's commit without advancing the DAG.
    Retry,
    /// Give up on this request; the saga moves to backward recovery.
    Abort,
}

/// A pluggable strategy for what to do about a failed transaction. One
/// operation: given the failing request, its cause, and how many times it
/// has already been attempted, decide whether to retry or abort.
#[async_trait]
pub trait RecoveryPolicy: Send + Sync {
    async fn on_transaction_failure(
        &self,
        request_id: &str,
        cause: &str,
        attempts: u32,
    ) -> RecoveryDecision;
}

/// The default policy: abort on the first failure. No retries.
#[derive(Debug, Default, Clone, Copy)]
pub struct BackwardRecovery;

#[async_trait]
impl RecoveryPolicy for BackwardRecovery {
    async fn on_transaction_failure(
        &self,
        request_id: &str,
        cause: &str,
        attempts: u32,
    ) -> RecoveryDecision {
        debug!(request_id, cause, attempts, "aborting on first failure");
        RecoveryDecision::Abort
    }
}

/// Backoff parameters for [`ForwardRecovery`].
#[derive(Debug, Clone)]
pub struct ForwardRecoveryConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// `None` retries forever, matching the spec's base contract of no
    /// bounded attempt count. `Some(n)` lets a deployment cap it, falling
    /// back to `Abort` once exhausted.
    pub max_attempts: Option<u32>,
}

impl Default for ForwardRecoveryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(2),
            max_attempts: None,
        }
    }
}

/// Retries a failed transaction with exponential backoff until it succeeds
/// or (if configured) a retry ceiling is hit.
pub struct ForwardRecovery {
    config: ForwardRecoveryConfig,
}

impl ForwardRecovery {
    pub fn new(config: ForwardRecoveryConfig) -> Self {
        Self { config }
    }

    fn backoff(&self) -> ExponentialBuilder {
        // backon defaults to `max_times = Some(3)`; without clearing that,
        // the backoff iterator runs dry after the 3rd attempt and every
        // later retry falls back to `max_delay` regardless of
        // `max_attempts`, flattening the exponential curve prematurely.
        ExponentialBuilder::default()
            .with_min_delay(self.config.base_delay)
            .with_max_delay(self.config.max_delay)
            .without_max_times()
    }
}

impl Default for ForwardRecovery {
    fn default() -> Self {
        Self::new(ForwardRecoveryConfig::default())
    }
}

#[async_trait]
impl RecoveryPolicy for ForwardRecovery {
    async fn on_transaction_failure(
        &self,
        request_id: &str,
        cause: &str,
        attempts: u32,
    ) -> RecoveryDecision {
        if let Some(max) = self.config.max_attempts {
            if attempts >= max {
                warn!(request_id, cause, attempts, "retry ceiling hit, aborting");
                return RecoveryDecision::Abort;
            }
        }
        let delay = self
            .backoff()
            .build()
            .nth((attempts.saturating_sub(1)) as usize)
            .unwrap_or(self.config.max_delay);
        debug!(request_id, cause, attempts, delay_ms = %delay.as_millis(), "retrying");
        tokio::time::sleep(delay).await;
        RecoveryDecision::Retry
    }
}
