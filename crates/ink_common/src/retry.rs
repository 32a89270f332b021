//! Fixed-delay retry combinator wrapping every remote operation.
//!
//! One combinator serves the power module client and the image fetch so
//! attempt counting, per-attempt logging, and last-error propagation stay
//! uniform. No backoff: the power module daemon is local and either answers
//! within the policy window or is down.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::error::FrameError;

/// Attempt limit and fixed inter-attempt delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// Run `attempt` up to `policy.attempts` times, sleeping `policy.delay`
/// between tries.
///
/// An error for which `retryable` returns false is propagated immediately.
/// On exhaustion the last error is propagated verbatim; earlier errors are
/// only logged. A zero-attempt policy still runs one attempt.
pub async fn retry_with<T, P, F, Fut>(
    policy: RetryPolicy,
    op: &str,
    retryable: P,
    mut attempt: F,
) -> Result<T, FrameError>
where
    P: Fn(&FrameError) -> bool,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FrameError>>,
{
    let attempts = policy.attempts.max(1);
    let mut last_error: Option<FrameError> = None;

    for attempt_no in 1..=attempts {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) if !retryable(&e) => return Err(e),
            Err(e) => {
                warn!("{} failed (attempt {}/{}): {}", op, attempt_no, attempts, e);
                last_error = Some(e);
                if attempt_no < attempts {
                    sleep(policy.delay).await;
                }
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| FrameError::Module(format!("{} failed without running", op))))
}

/// [`retry_with`] using [`FrameError::is_retryable`] as the predicate.
pub async fn retry<T, F, Fut>(policy: RetryPolicy, op: &str, attempt: F) -> Result<T, FrameError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FrameError>>,
{
    retry_with(policy, op, FrameError::is_retryable, attempt).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_first_attempt_success_needs_no_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let value = retry(fast_policy(3), "probe", move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, FrameError>(42)
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_consume_one_attempt_each() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let value = retry(fast_policy(3), "flaky", move || {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= 2 {
                    Err(FrameError::Module(format!("transient {}", n)))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_propagates_the_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let err = retry(fast_policy(3), "down", move || {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Err::<u32, _>(FrameError::Connection(format!("refused {}", n)))
            }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(err.to_string().contains("refused 3"));
    }

    #[tokio::test]
    async fn test_non_retryable_error_short_circuits() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let err = retry(fast_policy(3), "bad input", move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(FrameError::Validation("negative offset".into()))
            }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, FrameError::Validation(_)));
    }

    #[tokio::test]
    async fn test_zero_attempt_policy_still_runs_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let value = retry(fast_policy(0), "degenerate", move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, FrameError>("once")
            }
        })
        .await
        .unwrap();

        assert_eq!(value, "once");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_default_policy_matches_module_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts, 3);
        assert_eq!(policy.delay, Duration::from_secs(2));
    }
}
