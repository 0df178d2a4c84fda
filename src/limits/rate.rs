//! Sliding-window rate limiter for outbound requests.
//!
//! Admission counts requests in a trailing time window rather than
//! refilling a token bucket: each admitted request records its timestamp,
//! and a request is admitted once fewer than `max_requests` timestamps
//! remain inside the window. The check-and-record sequence runs under one
//! async mutex so two concurrent callers can never both take the last
//! slot.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// Sliding-window admission control.
///
/// Only [`acquire`](RateLimiter::acquire) is authoritative under
/// concurrency; the introspection methods are best-effort reads.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Limiter admitting at most `max_requests` per trailing `window`.
    ///
    /// `max_requests` must be at least 1.
    pub fn new(max_requests: usize, window: Duration) -> Self {
        debug_assert!(max_requests > 0, "a zero-slot limiter can never admit");
        RateLimiter { max_requests, window, timestamps: Mutex::new(VecDeque::new()) }
    }

    /// Acquire one admission slot, suspending until one is available.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut queue = self.timestamps.lock().await;
                let now = Instant::now();
                Self::evict(&mut queue, now, self.window);

                if queue.len() < self.max_requests {
                    queue.push_back(now);
                    return;
                }

                match queue.front() {
                    Some(oldest) => self.window.saturating_sub(now - *oldest),
                    None => self.window,
                }
            };

            trace!(?wait, "rate limit reached, waiting for window to slide");
            tokio::time::sleep(wait).await;
            // Another caller may have taken the freed slot; re-evaluate.
        }
    }

    /// Like [`acquire`](RateLimiter::acquire), but gives up after
    /// `timeout`. Returns whether a slot was acquired.
    pub async fn acquire_with_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.acquire()).await.is_ok()
    }

    /// Best-effort count of immediately available slots.
    pub async fn available_slots(&self) -> usize {
        let mut queue = self.timestamps.lock().await;
        Self::evict(&mut queue, Instant::now(), self.window);
        self.max_requests.saturating_sub(queue.len())
    }

    /// Best-effort wait until the next slot frees up. Zero when a slot is
    /// free now.
    pub async fn wait_time(&self) -> Duration {
        let mut queue = self.timestamps.lock().await;
        let now = Instant::now();
        Self::evict(&mut queue, now, self.window);

        if queue.len() < self.max_requests {
            return Duration::ZERO;
        }
        match queue.front() {
            Some(oldest) => self.window.saturating_sub(now - *oldest),
            None => Duration::ZERO,
        }
    }

    /// Clear all recorded timestamps.
    pub async fn reset(&self) {
        self.timestamps.lock().await.clear();
    }

    fn evict(queue: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(oldest) = queue.front() {
            if now.duration_since(*oldest) >= window {
                queue.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn admits_up_to_limit_immediately() {
        let limiter = RateLimiter::new(2, Duration::from_secs(1));
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.available_slots().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn third_caller_waits_for_window_to_slide() {
        let limiter = RateLimiter::new(2, Duration::from_secs(1));
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;

        // The third admission waits out the remainder of the 1s window.
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn window_bound_holds_over_many_acquires() {
        let window = Duration::from_secs(1);
        let limiter = RateLimiter::new(3, window);
        let mut admitted: Vec<Instant> = Vec::new();

        for _ in 0..10 {
            limiter.acquire().await;
            admitted.push(Instant::now());
        }

        // No trailing window contains more than max_requests admissions:
        // every fourth admission lands at least a full window later.
        for pair in admitted.windows(4) {
            assert!(
                pair[3].duration_since(pair[0]) >= window,
                "four admissions within one window"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_never_overfill_a_slot() {
        use std::sync::Arc;

        let limiter = Arc::new(RateLimiter::new(1, Duration::from_secs(1)));
        let start = Instant::now();

        let tasks: Vec<_> = (0..3)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move {
                    limiter.acquire().await;
                    Instant::now()
                })
            })
            .collect();

        let mut times = Vec::new();
        for task in tasks {
            times.push(task.await.expect("task"));
        }
        times.sort();

        // One admission per window: 0s, 1s, 2s.
        assert_eq!(times[0] - start, Duration::ZERO);
        assert_eq!(times[1] - start, Duration::from_secs(1));
        assert_eq!(times[2] - start, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_variant_fails_instead_of_suspending() {
        let limiter = RateLimiter::new(1, Duration::from_secs(10));
        assert!(limiter.acquire_with_timeout(Duration::from_secs(1)).await);
        assert!(!limiter.acquire_with_timeout(Duration::from_secs(1)).await);

        // The failed acquisition recorded nothing.
        limiter.reset().await;
        assert_eq!(limiter.available_slots().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_time_reports_remaining_window() {
        let limiter = RateLimiter::new(1, Duration::from_secs(4));
        assert_eq!(limiter.wait_time().await, Duration::ZERO);

        limiter.acquire().await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(limiter.wait_time().await, Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_the_window() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        limiter.acquire().await;
        assert_eq!(limiter.available_slots().await, 0);

        limiter.reset().await;
        assert_eq!(limiter.available_slots().await, 1);

        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
