//! Token-bucket rate limiting, one bucket per request origin (`clientIP`).

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;

const INACTIVE_BUCKET_BOUND: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
    last_seen: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, refill_rate: f64) -> Self {
        let now = Instant::now();
        Self {
            tokens: capacity,
            capacity,
            refill_rate,
            last_refill: now,
            last_seen: now,
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
        self.last_seen = now;
    }

    fn try_allow(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// `Allow(originKey)`: loads or creates the bucket for `origin`, refills it
/// proportional to elapsed time, and admits the request if at least one
/// token is available.
pub struct RateLimiter {
    buckets: Arc<DashMap<String, TokenBucket>>,
    burst_size: u32,
    requests_per_second: f64,
}

impl RateLimiter {
    pub fn new(requests_per_second: f64, burst_size: u32) -> Self {
        Self {
            buckets: Arc::new(DashMap::new()),
            burst_size,
            requests_per_second,
        }
    }

    pub fn allow(&self, origin: &str) -> bool {
        let mut bucket = self
            .buckets
            .entry(origin.to_string())
            .or_insert_with(|| TokenBucket::new(self.burst_size as f64, self.requests_per_second));
        bucket.try_allow()
    }

    /// Spawns a background sweeper that removes buckets idle beyond
    /// `INACTIVE_BUCKET_BOUND`, ticking every `cleanup_interval`.
    pub fn spawn_sweeper(self: &Arc<Self>, cleanup_interval: Duration) -> tokio::task::JoinHandle<()> {
        let buckets = self.buckets.clone();
        tokio::spawn(async move {
            let mut ticker = interval(cleanup_interval);
            loop {
                ticker.tick().await;
                let now = Instant::now();
                buckets.retain(|_, bucket| now.duration_since(bucket.last_seen) < INACTIVE_BUCKET_BOUND);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_burst_then_denies() {
        let limiter = RateLimiter::new(2.0, 2);
        assert!(limiter.allow("origin-a"));
        assert!(limiter.allow("origin-a"));
        assert!(!limiter.allow("origin-a"));
    }

    #[test]
    fn origins_have_independent_buckets() {
        let limiter = RateLimiter::new(1.0, 1);
        assert!(limiter.allow("origin-a"));
        assert!(limiter.allow("origin-b"));
        assert!(!limiter.allow("origin-a"));
    }

    #[test]
    fn refills_over_time() {
        let mut bucket = TokenBucket::new(2.0, 1000.0);
        bucket.tokens = 0.0;
        std::thread::sleep(Duration::from_millis(10));
        assert!(bucket.try_allow());
    }
}
