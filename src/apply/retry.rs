//! Retry with exponential backoff around provider calls.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::graph::ResourceId;
use crate::provider::ProviderOperation;

/// How transient provider failures are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_millis(5000),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

/// Runs `call` until it succeeds, fails permanently, or retries run out.
///
/// Each attempt is bounded by `timeout`; an attempt that runs out of time
/// counts as a transient failure. Returns the number of attempts made along
/// with the final result.
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    timeout: Duration,
    operation: ProviderOperation,
    id: &ResourceId,
    mut call: F,
) -> (u32, Result<T, ProviderError>)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        let result = tokio::time::timeout(timeout, call())
            .await
            .unwrap_or_else(|_| {
                Err(ProviderError::transient(format!(
                    "{operation} of {id} timed out after {}ms",
                    timeout.as_millis()
                )))
            });

        match result {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{operation} of {id} succeeded on attempt {attempt}");
                }
                return (attempt, Ok(value));
            }
            Err(e) if e.is_transient() && attempt <= policy.max_retries => {
                let delay = policy.backoff(attempt);
                warn!(
                    "{operation} of {id} failed ({e}), retrying in {}ms ({attempt}/{})",
                    delay.as_millis(),
                    policy.max_retries
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return (attempt, Err(e)),
        }
    }
}
