// fulfillment/src/services/rate_limit.rs

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Admission check for a caller key (client IP for the status endpoint).
pub trait RateLimiter: Send + Sync {
  /// `true` when the request may proceed.
  fn check(&self, key: &str) -> bool;
}

/// Allows `limit` requests per key in each fixed `window`.
pub struct FixedWindowLimiter {
  limit: u32,
  window: Duration,
  buckets: Mutex<HashMap<String, (Instant, u32)>>,
}

impl FixedWindowLimiter {
  pub fn new(limit: u32, window: Duration) -> Self {
    Self {
      limit,
      window,
      buckets: Mutex::new(HashMap::new()),
    }
  }

  pub fn per_minute(limit: u32) -> Self {
    Self::new(limit, Duration::from_secs(60))
  }

  fn check_at(&self, key: &str, now: Instant) -> bool {
    let mut buckets = self.buckets.lock();
    if buckets.len() > 10_000 {
      buckets.retain(|_, (started, _)| now.duration_since(*started) < self.window);
    }
    let (started, count) = buckets.entry(key.to_string()).or_insert((now, 0));
    if now.duration_since(*started) >= self.window {
      *started = now;
      *count = 0;
    }
    if *count >= self.limit {
      return false;
    }
    *count += 1;
    true
  }
}

impl RateLimiter for FixedWindowLimiter {
  fn check(&self, key: &str) -> bool {
    self.check_at(key, Instant::now())
  }
}

/// Lets everything through.
pub struct Unlimited;

impl RateLimiter for Unlimited {
  fn check(&self, _key: &str) -> bool {
    true
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn blocks_after_limit_within_window() {
    let limiter = FixedWindowLimiter::new(2, Duration::from_secs(60));
    let now = Instant::now();
    assert!(limiter.check_at("1.2.3.4", now));
    assert!(limiter.check_at("1.2.3.4", now));
    assert!(!limiter.check_at("1.2.3.4", now));
    assert!(limiter.check_at("5.6.7.8", now));
  }

  #[test]
  fn new_window_resets_the_count() {
    let limiter = FixedWindowLimiter::new(1, Duration::from_secs(60));
    let now = Instant::now();
    assert!(limiter.check_at("ip", now));
    assert!(!limiter.check_at("ip", now + Duration::from_secs(30)));
    assert!(limiter.check_at("ip", now + Duration::from_secs(61)));
  }
}
