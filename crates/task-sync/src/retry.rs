//! Bounded retry and visibility polling.
//!
//! Two budgets are kept apart:
//! - per-call retries for transient store errors (`with_retry`)
//! - visibility polls that wait for an eventually consistent listing to catch
//!   up with a write (`poll_until`)
//!
//! Fatal errors (rate limiting, authorization) end both immediately.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::store::StoreError;

/// Configuration for bounded retries with capped exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (1.0 = fixed delay)
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Fixed delay between attempts.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            backoff_factor: 1.0,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay_secs = self.initial_delay.as_secs_f64()
            * self.backoff_factor.powi(attempt.saturating_sub(1) as i32);

        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Run one remote call under a timeout.
pub async fn timed<T, Fut>(timeout: Duration, operation: &str, call: Fut) -> Result<T, StoreError>
where
    Fut: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout {
            operation: operation.to_string(),
        }),
    }
}

/// Execute a remote call, retrying transient errors within the policy budget.
///
/// Non-retryable errors (including fatal ones) are returned immediately. When
/// the budget runs out the last transient error is returned as is.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, f: F) -> Result<T, StoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(operation, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Result of waiting for a change to show up in an eventually consistent view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The expected state was observed on attempt `attempts`
    Confirmed { attempts: u32 },
    /// The budget ran out, or a fatal error stopped polling early
    Exhausted {
        attempts: u32,
        last_error: Option<String>,
    },
}

/// Poll `check` until it reports `true` or the attempt budget runs out.
///
/// Transient errors and timeouts count as "not yet visible". Fatal errors stop
/// polling without retry; they are reported through `last_error` because the
/// change being polled for has already been made.
pub async fn poll_until<F, Fut>(policy: &RetryPolicy, operation: &str, check: F) -> PollOutcome
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<bool, StoreError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = None;
    for attempt in 1..=max_attempts {
        match check().await {
            Ok(true) => {
                debug!(operation, attempt, "Change observed");
                return PollOutcome::Confirmed { attempts: attempt };
            }
            Ok(false) => {}
            Err(err) if err.is_fatal() => {
                warn!(operation, attempt, error = %err, "Polling stopped by fatal error");
                return PollOutcome::Exhausted {
                    attempts: attempt,
                    last_error: Some(err.to_string()),
                };
            }
            Err(err) => {
                debug!(operation, attempt, error = %err, "Poll attempt failed");
                last_error = Some(err.to_string());
            }
        }
        if attempt < max_attempts {
            tokio::time::sleep(policy.delay_for(attempt)).await;
        }
    }
    warn!(operation, attempts = max_attempts, "Change not observed within poll budget");
    PollOutcome::Exhausted {
        attempts: max_attempts,
        last_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::fixed(max_attempts, Duration::from_millis(1))
    }

    #[test]
    fn test_delay_exponential_and_capped() {
        let policy = RetryPolicy::default();

        // 0.5s, 1s, 2s, 4s, 4s (capped)
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(4));
        assert_eq!(policy.delay_for(10), Duration::from_secs(4));
    }

    #[test]
    fn test_fixed_delay() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(250));
        assert_eq!(policy.delay_for(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for(3), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_with_retry_recovers_from_transient_errors() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&quick(5), "read", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(StoreError::TransientNetwork {
                    message: "reset".into(),
                })
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_never_retries_fatal_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&quick(5), "read", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::RateLimited { retry_after: None })
        })
        .await;

        assert!(result.unwrap_err().is_fatal());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&quick(3), "read", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Timeout {
                operation: "read".into(),
            })
        })
        .await;

        assert!(matches!(result, Err(StoreError::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_poll_until_confirms_on_third_attempt() {
        let calls = AtomicU32::new(0);
        let outcome = poll_until(&quick(8), "delete", || async {
            Ok(calls.fetch_add(1, Ordering::SeqCst) >= 2)
        })
        .await;

        assert_eq!(outcome, PollOutcome::Confirmed { attempts: 3 });
    }

    #[tokio::test]
    async fn test_poll_until_exhausts() {
        let outcome = poll_until(&quick(4), "create", || async { Ok(false) }).await;
        assert_eq!(
            outcome,
            PollOutcome::Exhausted {
                attempts: 4,
                last_error: None
            }
        );
    }

    #[tokio::test]
    async fn test_poll_until_stops_on_fatal_error() {
        let calls = AtomicU32::new(0);
        let outcome = poll_until(&quick(8), "create", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Forbidden {
                message: "token revoked".into(),
            })
        })
        .await;

        assert!(matches!(outcome, PollOutcome::Exhausted { attempts: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timed_maps_elapsed_to_timeout() {
        let result: Result<(), _> = timed(Duration::from_millis(5), "slow read", async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;

        assert_eq!(
            result.unwrap_err(),
            StoreError::Timeout {
                operation: "slow read".into()
            }
        );
    }
}
