//! Per-tenant token-bucket admission control.
//!
//! One bucket per `user_id`, created on first request. Buckets live in a
//! dashmap: lookups contend only on their shard, and holding the entry
//! reference makes the refill-then-consume sequence atomic per user.

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Default bucket capacity (burst size).
pub const DEFAULT_BUCKET_CAPACITY: f64 = 10.0;

/// Default refill rate, tokens per minute.
pub const DEFAULT_REFILL_PER_MINUTE: f64 = 100.0;

/// Buckets idle longer than this are swept.
pub const IDLE_BUCKET_MAX_AGE: Duration = Duration::from_secs(3600);

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, now: Instant) -> Self {
        TokenBucket {
            tokens: capacity,
            last_refill: now,
        }
    }

    /// Refill first, then consume one token if available.
    fn try_consume(&mut self, now: Instant, capacity: f64, refill_per_sec: f64) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        let refilled = (self.tokens + elapsed * refill_per_sec).min(capacity);
        self.last_refill = now;
        if refilled >= 1.0 {
            self.tokens = refilled - 1.0;
            true
        } else {
            self.tokens = refilled;
            false
        }
    }
}

/// Token-bucket rate limiter keyed by user id.
pub struct RateLimiter {
    buckets: DashMap<String, TokenBucket>,
    capacity: f64,
    refill_per_sec: f64,
}

impl RateLimiter {
    pub fn new(capacity: f64, refill_per_minute: f64) -> Self {
        RateLimiter {
            buckets: DashMap::new(),
            capacity,
            refill_per_sec: refill_per_minute / 60.0,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_BUCKET_CAPACITY, DEFAULT_REFILL_PER_MINUTE)
    }

    /// Admit or reject one request for `user_id`.
    pub fn try_acquire(&self, user_id: &str) -> bool {
        let now = Instant::now();
        let mut bucket = self
            .buckets
            .entry(user_id.to_string())
            .or_insert_with(|| TokenBucket::new(self.capacity, now));
        bucket.try_consume(now, self.capacity, self.refill_per_sec)
    }

    /// Drop buckets idle for longer than `max_age`. Returns the number
    /// swept.
    pub fn sweep_idle(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_refill) < max_age);
        before - self.buckets.len()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}
