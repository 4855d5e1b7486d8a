//! Poll-until-terminal reconciliation.
//!
//! Remote key-state transitions complete asynchronously server-side, while
//! callers need a synchronous answer. [`wait_until`] bridges the two by
//! probing remote state at a fixed interval until a caller-supplied
//! condition holds or a bounded retry budget runs out.
//!
//! This is deliberately not a retry mechanism: a probe that *fails* aborts
//! the wait immediately. Only a probe that succeeds with "not done yet" is
//! tried again. Transient-failure retry lives in
//! [`keywarden_mgmt::retry::RetryPolicy`].

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Why a [`wait_until`] call stopped without observing its condition.
///
/// The two variants are distinct so callers can render "the operation did
/// not complete within the expected time" separately from a concrete API
/// failure.
#[derive(Debug, Error)]
pub enum WaitError<E> {
    /// The probe itself failed. Probe errors are never retried.
    #[error("probe failed: {0}")]
    Probe(#[source] E),

    /// Every attempt in the budget observed "not done yet".
    #[error("condition not reached after {attempts} attempt(s)")]
    Timeout { attempts: u32 },
}

/// Polling budget for a reconciliation wait.
///
/// `interval * max_attempts` bounds the total wall-clock wait.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    /// Total number of probe invocations (minimum 1).
    pub max_attempts: u32,
    /// Fixed sleep between probe invocations.
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 100,
            interval: Duration::from_millis(20),
        }
    }
}

/// Probe remote state until `probe` reports done, it fails, or the budget
/// is exhausted.
///
/// Each invocation of `probe` returns:
/// - `Ok(true)` — the terminal condition holds; return success immediately.
/// - `Ok(false)` — not yet; sleep `interval` and probe again.
/// - `Err(e)` — the probe failed; abort immediately with
///   [`WaitError::Probe`].
///
/// At most `max_attempts` probes are issued (a value of 0 is treated as 1),
/// with no sleep after the last one. Exhausting the budget yields
/// [`WaitError::Timeout`]. The most recent probe result always wins; results
/// are never averaged or debounced, and no state is kept between calls.
///
/// The future suspends only inside `probe` and the interval sleep, so
/// dropping it — from a `tokio::select!` branch or a surrounding
/// `tokio::time::timeout` — aborts the wait at the next suspension point.
pub async fn wait_until<F, Fut, E>(
    max_attempts: u32,
    interval: Duration,
    mut probe: F,
) -> Result<(), WaitError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    let budget = max_attempts.max(1);

    for attempt in 1..=budget {
        match probe().await {
            Err(err) => return Err(WaitError::Probe(err)),
            Ok(true) => return Ok(()),
            Ok(false) => {
                if attempt < budget {
                    debug!(
                        attempt,
                        max_attempts = budget,
                        interval_ms = interval.as_millis() as u64,
                        "condition pending, polling again"
                    );
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }

    warn!(attempts = budget, "condition not reached before budget exhausted");
    Err(WaitError::Timeout { attempts: budget })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    #[derive(Debug, Error, PartialEq)]
    enum ProbeError {
        #[error("entity not found")]
        NotFound,
        #[error("permission denied")]
        Fatal,
    }

    fn counter() -> Arc<AtomicU32> {
        Arc::new(AtomicU32::new(0))
    }

    #[tokio::test]
    async fn done_on_first_probe_returns_without_sleeping() {
        let calls = counter();
        let calls_probe = calls.clone();

        let started = Instant::now();
        wait_until(5, Duration::from_secs(60), move || {
            let calls = calls_probe.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ProbeError>(true)
            }
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // A 60s interval would dominate the runtime if any sleep happened.
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn probe_error_aborts_immediately() {
        let calls = counter();
        let calls_probe = calls.clone();

        let result = wait_until(5, Duration::ZERO, move || {
            let calls = calls_probe.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<bool, _>(ProbeError::Fatal)
            }
        })
        .await;

        assert!(matches!(result, Err(WaitError::Probe(ProbeError::Fatal))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_returns_timeout_after_exact_budget() {
        let calls = counter();
        let calls_probe = calls.clone();

        let result = wait_until(4, Duration::ZERO, move || {
            let calls = calls_probe.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ProbeError>(false)
            }
        })
        .await;

        assert!(matches!(result, Err(WaitError::Timeout { attempts: 4 })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn succeeds_mid_budget_with_interval_sleeps() {
        let calls = counter();
        let calls_probe = calls.clone();

        let started = Instant::now();
        wait_until(5, Duration::from_millis(10), move || {
            let calls = calls_probe.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Ok::<_, ProbeError>(n >= 4)
            }
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // Three pending results, so three sleeps of >= 10ms each.
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn repeated_waits_on_satisfied_condition_are_idempotent() {
        for _ in 0..2 {
            let calls = counter();
            let calls_probe = calls.clone();

            wait_until(3, Duration::ZERO, move || {
                let calls = calls_probe.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ProbeError>(true)
                }
            })
            .await
            .unwrap();

            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn caller_can_treat_not_found_as_pending() {
        // Creation-visibility flows map a missing entity to "not yet" while
        // every other probe failure stays fatal.
        let calls = counter();
        let calls_probe = calls.clone();

        wait_until(5, Duration::ZERO, move || {
            let calls = calls_probe.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                let read: Result<(), ProbeError> = if n <= 2 {
                    Err(ProbeError::NotFound)
                } else {
                    Ok(())
                };
                match read {
                    Ok(()) => Ok::<_, ProbeError>(true),
                    Err(ProbeError::NotFound) => Ok(false),
                    Err(err) => Err(err),
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn zero_attempts_is_clamped_to_one() {
        let calls = counter();
        let calls_probe = calls.clone();

        let result = wait_until(0, Duration::ZERO, move || {
            let calls = calls_probe.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ProbeError>(false)
            }
        })
        .await;

        assert!(matches!(result, Err(WaitError::Timeout { attempts: 1 })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropping_the_wait_cancels_it() {
        let calls = counter();
        let calls_probe = calls.clone();

        let wait = wait_until(100, Duration::from_secs(60), move || {
            let calls = calls_probe.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ProbeError>(false)
            }
        });

        // The surrounding deadline fires during the first interval sleep.
        let result = tokio::time::timeout(Duration::from_millis(50), wait).await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
