//! Retry Logic with Fixed Backoff
//!
//! The network dispatcher resends a sealed batch when a produce attempt fails
//! with a transient error.
//!
//! ## Schedule
//!
//! ```text
//! ┌──────────────────────────────┐
//! │  RetryPolicy                 │
//! │  - max_retries: 3            │
//! │  - backoff: 100ms            │
//! └──────┬───────────────────────┘
//!        │
//!        ├─→ Attempt 1: Immediate
//!        ├─→ Attempt 2: Wait 100ms
//!        ├─→ Attempt 3: Wait 100ms
//!        └─→ Attempt 4: Wait 100ms, then give up
//! ```
//!
//! ## Retryable vs Non-Retryable Errors
//!
//! Classification lives on [`ClientError::is_retryable`]:
//!
//! - **Retryable**: `NetworkError`, `Timeout`, `NotLeaderForPartition`,
//!   `LeaderNotAvailable`
//! - **Non-retryable**: everything else (`BrokerError`, input and admission
//!   errors)
//!
//! Nothing is held across the backoff sleep: an operation acquires whatever
//! it needs (an in-flight slot, a worker permit) inside the attempt.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::ProducerConfig;
use crate::error::Result;

/// Retry budget and spacing.
///
/// `max_retries` counts resends, so a policy with `max_retries = 2` makes at
/// most three attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts
    pub max_retries: usize,

    /// Wait between attempts
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: usize, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    pub fn from_config(config: &ProducerConfig) -> Self {
        Self::new(config.retries, config.retry_backoff)
    }

    /// Backoff before retry number `attempt` (0-indexed). Constant.
    pub fn backoff(&self, _attempt: usize) -> Duration {
        self.backoff
    }

    /// Total attempts this policy allows.
    pub fn max_attempts(&self) -> usize {
        self.max_retries.saturating_add(1)
    }
}

/// Run `operation` until it succeeds, fails permanently, or the retry budget
/// is spent.
///
/// The closure receives the 0-indexed attempt number.
///
/// # Returns
///
/// - `Ok(T)` if an attempt succeeds
/// - `Err(e)` with the first non-retryable error, or the last retryable
///   error once `max_retries` resends have failed
pub async fn retry_with_backoff<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        match operation(attempt).await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(attempt = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(error) => {
                if !error.is_retryable() {
                    warn!(error = %error, "Non-retryable error, giving up");
                    return Err(error);
                }

                if attempt >= policy.max_retries {
                    warn!(
                        attempt = attempt + 1,
                        max_retries = policy.max_retries,
                        error = %error,
                        "Max retries exhausted, giving up"
                    );
                    return Err(error);
                }

                let backoff = policy.backoff(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %error,
                    "Retryable error, backing off"
                );

                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

/// Convenience for operations that do not need the attempt number.
pub async fn retry<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_with_backoff(policy, |_| operation()).await
}
