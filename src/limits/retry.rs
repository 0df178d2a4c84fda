//! Exponential-backoff retry policy for outbound requests.
//!
//! Pure computation, no I/O: the policy classifies which failures are
//! worth retrying and how long to wait before each attempt. The request
//! path combines it with the rate limiter in
//! [`send_with_retry`](super::send_with_retry).

use std::collections::HashSet;

use rand::Rng;

use crate::{NvrError, Result};

/// Minimum delay between attempts, in seconds. A server-supplied zero or a
/// jitter perturbation can otherwise collapse the delay into a tight loop.
pub const MIN_RETRY_DELAY: f64 = 0.1;

/// Status codes worth retrying by default: throttling and transient
/// gateway failures.
pub const DEFAULT_RETRYABLE_STATUS_CODES: [u16; 4] = [429, 502, 503, 504];

/// Backoff and classification parameters for the outbound request path.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: f64,
    max_delay: f64,
    exponential_base: f64,
    jitter: bool,
    retryable_status_codes: HashSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            base_delay: 0.5,
            max_delay: 30.0,
            exponential_base: 2.0,
            jitter: true,
            retryable_status_codes: DEFAULT_RETRYABLE_STATUS_CODES.into_iter().collect(),
        }
    }
}

impl RetryPolicy {
    /// Construct a policy, validating its parameters.
    ///
    /// # Errors
    ///
    /// [`NvrError::InvalidConfig`] when `base_delay <= 0`,
    /// `max_delay <= 0`, or `exponential_base <= 1`.
    pub fn new(
        max_retries: u32,
        base_delay: f64,
        max_delay: f64,
        exponential_base: f64,
        jitter: bool,
    ) -> Result<Self> {
        if !(base_delay > 0.0) {
            return Err(NvrError::invalid_config("base_delay", "must be positive"));
        }
        if !(max_delay > 0.0) {
            return Err(NvrError::invalid_config("max_delay", "must be positive"));
        }
        if !(exponential_base > 1.0) {
            return Err(NvrError::invalid_config("exponential_base", "must be greater than 1"));
        }

        Ok(RetryPolicy {
            max_retries,
            base_delay,
            max_delay,
            exponential_base,
            jitter,
            retryable_status_codes: DEFAULT_RETRYABLE_STATUS_CODES.into_iter().collect(),
        })
    }

    /// Replace the retryable status set.
    pub fn with_retryable_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_status_codes = codes.into_iter().collect();
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay in seconds before re-issuing attempt number `attempt`
    /// (zero-based).
    ///
    /// A server-supplied Retry-After wins over the exponential schedule;
    /// both are capped at `max_delay`. With jitter enabled the delay is
    /// perturbed by up to ±25%, then floored at [`MIN_RETRY_DELAY`] (the
    /// floor itself capped at `max_delay`).
    pub fn calculate_delay(&self, attempt: u32, retry_after: Option<f64>) -> f64 {
        let mut delay = match retry_after {
            Some(server_delay) => server_delay.min(self.max_delay),
            None => {
                (self.base_delay * self.exponential_base.powi(attempt as i32)).min(self.max_delay)
            }
        };

        if self.jitter {
            let factor: f64 = rand::thread_rng().gen_range(-0.25..=0.25);
            delay += delay * factor;
        }

        delay.clamp(MIN_RETRY_DELAY.min(self.max_delay), self.max_delay)
    }

    /// Parse a Retry-After header value as seconds.
    ///
    /// Only the numeric-seconds form is honored; HTTP-date values are
    /// treated as absent rather than parsed.
    pub fn parse_retry_after(header: Option<&str>) -> Option<f64> {
        let seconds: f64 = header?.trim().parse().ok()?;
        if seconds.is_finite() && seconds >= 0.0 { Some(seconds) } else { None }
    }

    /// Whether `status` is in the retryable set.
    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_status_codes.contains(&status)
    }

    /// Whether a failure with `status` on zero-based attempt `attempt`
    /// should be re-issued.
    pub fn should_retry(&self, attempt: u32, status: u16) -> bool {
        attempt < self.max_retries && self.is_retryable_status(status)
    }
}
