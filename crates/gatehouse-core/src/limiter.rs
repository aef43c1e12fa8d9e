//! Process-wide token-bucket admission control.

use std::sync::{Mutex, PoisonError};

use tokio::time::Instant;

use crate::config::settings::RateLimitConfig;

/// A single token bucket shared by every caller.
///
/// Refill and spend happen under one lock, so concurrent callers never
/// credit the same elapsed interval twice.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Creates a full bucket.
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity: f64::from(capacity),
            refill_per_sec,
            bucket: Mutex::new(Bucket {
                tokens: f64::from(capacity),
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.capacity, config.refill_per_second)
    }

    /// Admits one call if a whole token is available.
    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    /// Deterministic form of [`RateLimiter::allow`].
    ///
    /// A `now` earlier than the last refill credits nothing and leaves the
    /// refill mark where it is.
    pub fn allow_at(&self, now: Instant) -> bool {
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);

        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        if now > bucket.last_refill {
            bucket.last_refill = now;
        }

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens currently in the bucket, without refilling.
    pub fn available(&self) -> f64 {
        self.bucket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tokens
    }
}
