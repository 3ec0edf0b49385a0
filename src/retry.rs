//! Bounded retry for idempotent remote steps
//!
//! Every remote interaction in the lifecycle (submit, poll, dataset fetch)
//! runs as an idempotent step under a [`RetryPolicy`]. Only errors the
//! error type classifies as transient are re-attempted; validation and
//! not-found errors surface immediately. This is the seam a durable
//! execution substrate would replace: swap [`StepRunner`] for an engine
//! that persists step results and the orchestration code above it does not
//! change.

use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Default maximum attempts per step
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default first backoff delay
const DEFAULT_INITIAL_DELAY_MS: u64 = 500;

/// Default backoff ceiling
const DEFAULT_MAX_DELAY_SECS: u64 = 30;

/// Retry policy: bounded attempts with doubling backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first
    pub max_attempts: u32,

    /// Delay before the second attempt
    pub initial_delay: Duration,

    /// Backoff ceiling
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
        }
    }
}

impl RetryPolicy {
    /// Set maximum attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set initial delay
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Policy with near-zero delays, for tests
    pub fn immediate() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        }
    }
}

/// Runs idempotent steps under a retry policy
#[derive(Debug, Clone, Default)]
pub struct StepRunner {
    policy: RetryPolicy,
}

impl StepRunner {
    /// Create a runner with the given policy
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Run `op` until it succeeds, a non-transient error occurs, or the
    /// attempt budget is exhausted. The last error is returned on
    /// exhaustion.
    pub async fn step<T, F, Fut>(&self, name: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut delay = self.policy.initial_delay;
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(step = %name, attempt, "Step succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    warn!(
                        step = %name,
                        attempt,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Transient step failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.policy.max_delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
