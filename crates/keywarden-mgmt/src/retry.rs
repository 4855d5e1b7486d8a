//! Exponential backoff retry for transient Management API failures.
//!
//! Retries *failing* operations (network faults, rate limits, 5xx). It is
//! not a polling mechanism: an operation that succeeds with "not done yet"
//! semantics is outside its contract.

use crate::error::{MgmtError, MgmtResult};
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (0 = no retries).
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy with the given max retries and base delay.
    /// The maximum delay cap defaults to 30 seconds.
    #[must_use]
    pub fn new(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            max_delay_ms: 30_000,
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(0, 0)
    }

    /// Whether the error should be retried at the given attempt number.
    #[must_use]
    pub fn should_retry(&self, attempt: u32, error: &MgmtError) -> bool {
        if attempt >= self.max_retries {
            return false;
        }
        error.is_retryable() || error.is_server_error()
    }

    /// Calculate delay for the given attempt using exponential backoff.
    ///
    /// If the error is [`MgmtError::RateLimited`] with a `retry_after_secs`
    /// value, that value is used directly (capped at `max_delay_ms`).
    /// Otherwise the delay is `min(base_delay_ms * 2^attempt, max_delay_ms)`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, error: &MgmtError) -> Duration {
        let millis = if let MgmtError::RateLimited {
            retry_after_secs: Some(retry_after),
        } = error
        {
            retry_after.saturating_mul(1000).min(self.max_delay_ms)
        } else {
            let exponential = self
                .base_delay_ms
                .saturating_mul(2u64.saturating_pow(attempt));
            exponential.min(self.max_delay_ms)
        };
        Duration::from_millis(millis)
    }

    /// Execute an async operation with retry.
    ///
    /// The closure `f` is called repeatedly until it succeeds, a non-retryable
    /// error is encountered, or the maximum number of retries is exhausted.
    pub async fn execute<F, Fut, T>(&self, operation_name: &str, mut f: F) -> MgmtResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = MgmtResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match f().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(
                            operation = operation_name,
                            attempt = attempt + 1,
                            "Operation succeeded after retries"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if !self.should_retry(attempt, &error) {
                        let was_retried =
                            attempt > 0 && (error.is_retryable() || error.is_server_error());
                        if attempt >= self.max_retries && was_retried {
                            warn!(
                                operation = operation_name,
                                attempts = attempt + 1,
                                error = %error,
                                "Max retries exceeded"
                            );
                            return Err(MgmtError::RetriesExhausted {
                                attempts: attempt + 1,
                                message: format!(
                                    "{operation_name} failed after {} attempt(s): {error}",
                                    attempt + 1
                                ),
                            });
                        }
                        // Non-retryable error, return immediately.
                        return Err(error);
                    }

                    let delay = self.delay_for(attempt, &error);
                    debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying after transient error"
                    );

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
