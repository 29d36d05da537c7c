//! In-process token bucket limiter.

use std::time::Duration;

use crate::clock::{self, SharedClock};
use crate::config::schema::RateLimitConfig;
use crate::config::validation::validate_rate_limit;
use crate::error::{TrafficError, TrafficResult};
use crate::observability::metrics;
use crate::rate_limit::bucket::{BucketTable, RateSnapshot};

/// Token bucket limiter whose buckets live in this process.
///
/// Checks never suspend; each key's bucket is updated under its own lock.
#[derive(Debug)]
pub struct LocalRateLimiter {
    capacity: f64,
    refill_rate: f64,
    buckets: BucketTable,
    clock: SharedClock,
}

impl LocalRateLimiter {
    pub const POLICY_NAME: &'static str = "token-bucket";

    pub fn new(config: &RateLimitConfig) -> TrafficResult<Self> {
        Self::with_clock(config, clock::system())
    }

    pub fn with_clock(config: &RateLimitConfig, clock: SharedClock) -> TrafficResult<Self> {
        let errors = validate_rate_limit(config);
        if !errors.is_empty() {
            return Err(TrafficError::Configuration(errors));
        }

        Ok(Self {
            capacity: config.capacity,
            refill_rate: config.refill_rate_per_second,
            buckets: BucketTable::new(),
            clock,
        })
    }

    pub fn policy_name(&self) -> &'static str {
        Self::POLICY_NAME
    }

    /// Take one token for `key` if one is available.
    pub fn is_allowed(&self, key: &str) -> bool {
        let now = self.clock.now();
        let allowed = self.buckets.try_acquire(key, self.capacity, self.refill_rate, now);
        if !allowed {
            tracing::debug!(key = %key, "Rate limit exceeded");
            metrics::record_rate_limited("local");
        }
        allowed
    }

    /// Bucket state for `key`, or `None` if the key has never been checked.
    pub fn snapshot(&self, key: &str) -> Option<RateSnapshot> {
        let tokens = self
            .buckets
            .peek(key, self.capacity, self.refill_rate, self.clock.now())?;
        Some(RateSnapshot {
            key: key.to_string(),
            tokens,
            capacity: self.capacity,
        })
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop buckets untouched for at least `max_idle`. A dropped key starts
    /// again with a full bucket.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let evicted = self.buckets.evict_idle(max_idle, self.clock.now());
        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.buckets.len(), "Evicted idle rate buckets");
            metrics::record_evicted(Self::POLICY_NAME, evicted);
        }
        evicted
    }
}
