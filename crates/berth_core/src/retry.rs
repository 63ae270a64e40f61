//! Bounded exponential backoff for retryable provider calls.

use std::future::Future;
use std::time::Duration;

use berth_provider::ProviderError;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Retry bounds for create and tag calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            multiplier: 2,
        }
    }
}

/// Why a retried call gave up.
#[derive(Debug)]
pub enum RetryError {
    /// Every attempt failed with a retryable error
    Exhausted { attempts: u32, last: ProviderError },
    /// A non-retryable error, returned on the attempt that produced it
    Fatal(ProviderError),
}

impl RetryPolicy {
    /// A policy that never sleeps; for tests and dry runs.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            multiplier: 1,
        }
    }

    /// Delay before attempt `attempt` (1-based; no delay before the first).
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = u64::from(self.multiplier.max(1)).saturating_pow(attempt - 2);
        let delay = self.initial_backoff_ms.saturating_mul(factor).min(self.max_backoff_ms);
        Duration::from_millis(delay)
    }

    /// Run `operation` until it succeeds, fails fatally, or attempts run out.
    pub async fn run<T, F, Fut>(&self, what: &str, mut operation: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let delay = self.backoff(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!("{} failed (attempt {}/{}): {}", what, attempt, max_attempts, e);
                    attempt += 1;
                }
                Err(e) if e.is_retryable() => {
                    return Err(RetryError::Exhausted { attempts: attempt, last: e });
                }
                Err(e) => return Err(RetryError::Fatal(e)),
            }
        }
    }
}
