//! Concurrency primitives protecting the remote service from abuse:
//! sliding-window rate limiting and exponential-backoff retry.

mod rate;
mod request;
mod retry;

pub use rate::RateLimiter;
pub use request::send_with_retry;
pub use retry::{DEFAULT_RETRYABLE_STATUS_CODES, MIN_RETRY_DELAY, RetryPolicy};
