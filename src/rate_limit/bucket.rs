//! Token bucket state and the per-key bucket table.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// A single token bucket. Refills lazily on access.
#[derive(Debug, Clone)]
pub(crate) struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    last_access: Instant,
}

impl TokenBucket {
    /// New buckets start full.
    pub(crate) fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
            last_access: now,
        }
    }

    fn refill(&mut self, capacity: f64, refill_rate: f64, now: Instant) {
        // A clock that moved backwards adds nothing and keeps last_refill.
        if now > self.last_refill {
            let elapsed = now.duration_since(self.last_refill).as_secs_f64();
            self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
            self.last_refill = now;
        }
        self.last_access = now;
    }

    /// Refill, then take one token if available.
    pub(crate) fn try_acquire(&mut self, capacity: f64, refill_rate: f64, now: Instant) -> bool {
        self.refill(capacity, refill_rate, now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub(crate) fn tokens(&self) -> f64 {
        self.tokens
    }
}

/// Point-in-time view of one key's bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateSnapshot {
    pub key: String,
    /// Tokens available at the time of the snapshot, refill included.
    pub tokens: f64,
    pub capacity: f64,
}

/// Buckets keyed by policy key, each behind its own mutex.
#[derive(Debug, Default)]
pub(crate) struct BucketTable {
    buckets: DashMap<String, Arc<Mutex<TokenBucket>>>,
}

impl BucketTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn try_acquire(&self, key: &str, capacity: f64, refill_rate: f64, now: Instant) -> bool {
        let bucket = self.bucket(key, capacity, now);
        let mut bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
        bucket.try_acquire(capacity, refill_rate, now)
    }

    /// Current token count for `key` as if it were accessed at `now`,
    /// without consuming anything or touching the idle timer.
    pub(crate) fn peek(&self, key: &str, capacity: f64, refill_rate: f64, now: Instant) -> Option<f64> {
        let bucket = self.buckets.get(key).map(|entry| Arc::clone(entry.value()))?;
        let mut copy = bucket.lock().unwrap_or_else(PoisonError::into_inner).clone();
        copy.refill(capacity, refill_rate, now);
        Some(copy.tokens())
    }

    pub(crate) fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Drop buckets untouched for at least `max_idle`. Buckets locked by an
    /// in-flight check are kept.
    pub(crate) fn evict_idle(&self, max_idle: Duration, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| {
            let keep = match bucket.try_lock() {
                Ok(bucket) => now.saturating_duration_since(bucket.last_access) < max_idle,
                Err(_) => true,
            };
            keep
        });
        before.saturating_sub(self.buckets.len())
    }

    fn bucket(&self, key: &str, capacity: f64, now: Instant) -> Arc<Mutex<TokenBucket>> {
        let existing = self.buckets.get(key).map(|entry| Arc::clone(entry.value()));
        if let Some(bucket) = existing {
            return bucket;
        }

        let entry = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::new(capacity, now))));
        Arc::clone(entry.value())
    }
}
