//! Retry with exponential backoff
//!
//! A reusable policy object injected into collaborator calls that are worth
//! retrying (the trending snapshot being the main one).

use crate::error::{Result, TrendError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: usize,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Fraction of the delay randomly added or removed (0.0 disables jitter)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    /// No waiting between attempts.
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Delay before retry number `attempt` (0-based), without jitter.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let delay_ms = (self.base_delay.as_millis() as f64)
            * self.backoff_multiplier.powi(attempt as i32);
        let delay_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(delay_ms as u64)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let spread = self.jitter.min(1.0);
        let factor = rand::thread_rng().gen_range((1.0 - spread)..=(1.0 + spread));
        delay.mul_f64(factor)
    }

    /// Runs `operation` until it succeeds, the error is not retryable, or attempts run out.
    pub async fn retry_with_backoff<F, Fut, T>(
        &self,
        what: &str,
        mut operation: F,
        is_retryable: impl Fn(&TrendError) -> bool,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if !is_retryable(&e) => return Err(e),
                Err(e) if attempt + 1 >= attempts => {
                    warn!(what, attempts, error = %e, "Giving up after final attempt");
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.jittered(self.delay_for_attempt(attempt));
                    warn!(
                        what,
                        attempt = attempt + 1,
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Network and source failures are worth another attempt; structural ones are not.
pub fn is_transient(error: &TrendError) -> bool {
    matches!(
        error,
        TrendError::SourceUnavailable { .. } | TrendError::Http(_) | TrendError::Timeout(_)
    )
}
