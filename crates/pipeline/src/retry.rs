//! Bounded exponential-backoff retry for collaborator calls.
//!
//! Only [`ServiceError::Transient`] failures are retried. Once the attempt
//! budget is spent the last error is returned so the caller can apply its
//! placeholder or drop policy; nothing here waits indefinitely.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::ServiceError;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Retry immediately; used by tests and local tools.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }
}

/// Calculate the next backoff delay from the current delay and policy.
///
/// The result is clamped to [`RetryPolicy::max_delay`].
pub fn next_delay(current: Duration, policy: &RetryPolicy) -> Duration {
    let next_ms = (current.as_millis() as f64 * policy.multiplier) as u64;
    Duration::from_millis(next_ms).min(policy.max_delay)
}

/// Run `op` until it succeeds, fails permanently, or the budget runs out.
///
/// `op` receives the 1-based attempt number. Returns
/// [`ServiceError::Cancelled`] as soon as `cancel` fires.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation: &str,
    mut op: F,
) -> Result<T, ServiceError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut delay = policy.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(ServiceError::Cancelled),
            result = op(attempt) => result,
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                tracing::warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying",
                );
            }
            Err(e) => {
                if e.is_transient() {
                    tracing::warn!(
                        operation,
                        attempt,
                        error = %e,
                        "Retry budget exhausted",
                    );
                }
                return Err(e);
            }
        }

        // Wait before the next attempt, respecting cancellation.
        tokio::select! {
            _ = cancel.cancelled() => return Err(ServiceError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }

        delay = next_delay(delay, policy);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use assert_matches::assert_matches;

    use super::*;

    // -- backoff --

    #[test]
    fn next_delay_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(
            next_delay(Duration::from_secs(1), &policy),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn next_delay_clamps_at_max() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(10),
            ..Default::default()
        };
        assert_eq!(
            next_delay(Duration::from_secs(8), &policy),
            Duration::from_secs(10)
        );
    }

    // -- retry loop --

    #[tokio::test]
    async fn transient_failures_retry_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(
            &RetryPolicy::immediate(3),
            &CancellationToken::new(),
            "test",
            |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(ServiceError::Transient("busy".into()))
                    } else {
                        Ok(attempt)
                    }
                }
            },
        )
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn budget_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(
            &RetryPolicy::immediate(2),
            &CancellationToken::new(),
            "test",
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ServiceError::Transient("still busy".into())) }
            },
        )
        .await;
        assert_matches!(result, Err(ServiceError::Transient(msg)) if msg == "still busy");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(
            &RetryPolicy::immediate(5),
            &CancellationToken::new(),
            "test",
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ServiceError::AssetUnavailable("gone".into())) }
            },
        )
        .await;
        assert_matches!(result, Err(ServiceError::AssetUnavailable(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let cancel = CancellationToken::new();
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_secs(60),
            ..Default::default()
        };
        let canceller = cancel.clone();
        let result: Result<(), _> = with_retry(&policy, &cancel, "test", |_| {
            canceller.cancel();
            async { Err(ServiceError::Transient("busy".into())) }
        })
        .await;
        assert_matches!(result, Err(ServiceError::Cancelled));
    }
}
