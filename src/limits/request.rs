//! The throttled, retrying outbound request path.
//!
//! Commands to the device are issued out-of-band from the push channel and
//! must not hammer it: every attempt first takes a rate-limiter slot, and
//! failures are re-issued on the retry policy's schedule. The actual HTTP
//! call lives outside this crate; callers hand in a future-returning
//! closure and surface failures as
//! [`NvrError::Request`](crate::NvrError::Request).

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use super::{RateLimiter, RetryPolicy};
use crate::{NvrError, Result};

/// Issue `request` through the limiter, retrying per `policy`.
///
/// Each attempt (including retries) acquires its own rate-limiter slot. A
/// [`NvrError::Request`] whose status is in the policy's retryable set is
/// re-issued after [`RetryPolicy::calculate_delay`], honoring a
/// server-supplied Retry-After carried on the error, up to
/// `policy.max_retries()` retries. Any other error, and exhaustion, surface
/// to the caller unchanged.
pub async fn send_with_retry<T, F, Fut>(
    limiter: &RateLimiter,
    policy: &RetryPolicy,
    mut request: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        limiter.acquire().await;

        let error = match request().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        let NvrError::Request { status, retry_after, .. } = &error else {
            return Err(error);
        };

        if !policy.should_retry(attempt, *status) {
            if policy.is_retryable_status(*status) {
                warn!(status, attempt, "retries exhausted");
            }
            return Err(error);
        }

        let delay = policy.calculate_delay(attempt, *retry_after);
        debug!(status, attempt, delay_secs = delay, "retrying request");
        tokio::time::sleep(Duration::from_secs_f64(delay)).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn limiter() -> RateLimiter {
        RateLimiter::new(100, Duration::from_secs(1))
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, 1.0, 30.0, 2.0, false).expect("valid policy")
    }

    #[tokio::test(start_paused = true)]
    async fn success_passes_through() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_ref = Arc::clone(&calls);

        let result = send_with_retry(&limiter(), &policy(), move || {
            let calls = Arc::clone(&calls_ref);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.expect("success"), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_status_is_retried_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_ref = Arc::clone(&calls);

        let result = send_with_retry(&limiter(), &policy(), move || {
            let calls = Arc::clone(&calls_ref);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(NvrError::request(503, None, "unavailable"))
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

        assert_eq!(result.expect("recovered"), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_status_surfaces_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_ref = Arc::clone(&calls);

        let result: Result<()> = send_with_retry(&limiter(), &policy(), move || {
            let calls = Arc::clone(&calls_ref);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(NvrError::request(404, None, "missing"))
            }
        })
        .await;

        assert!(matches!(result.unwrap_err(), NvrError::Request { status: 404, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_surfaces_the_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_ref = Arc::clone(&calls);

        let result: Result<()> = send_with_retry(&limiter(), &policy(), move || {
            let calls = Arc::clone(&calls_ref);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(NvrError::request(429, None, "throttled"))
            }
        })
        .await;

        assert!(matches!(result.unwrap_err(), NvrError::Request { status: 429, .. }));
        // Initial attempt plus max_retries.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn non_request_errors_are_not_retried() {
        let result: Result<()> = send_with_retry(&limiter(), &policy(), || async {
            Err(NvrError::auth_failed("bad cookie"))
        })
        .await;

        assert!(matches!(result.unwrap_err(), NvrError::Auth { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn server_retry_after_overrides_schedule() {
        use tokio::time::Instant;

        let calls = Arc::new(AtomicU32::new(0));
        let calls_ref = Arc::clone(&calls);
        let start = Instant::now();

        let result = send_with_retry(&limiter(), &policy(), move || {
            let calls = Arc::clone(&calls_ref);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(NvrError::request(429, Some(5.0), "throttled"))
                } else {
                    Ok(())
                }
            }
        })
        .await;

        result.expect("recovered");
        // Retry-After 5s, not the 1s exponential base delay.
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }
}
