//! Store-backed token bucket limiter.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::schema::RateLimitConfig;
use crate::config::validation::validate_rate_limit;
use crate::error::{TrafficError, TrafficResult};
use crate::observability::metrics;
use crate::rate_limit::store::TokenStore;
use crate::rate_limit::RateCheck;

/// Token bucket limiter whose buckets live in a [`TokenStore`].
///
/// Every check may suspend on the store and honors cancellation. Store
/// failures deny by default; `fail_open` turns them into allows.
#[derive(Debug, Clone)]
pub struct RemoteRateLimiter {
    store: Arc<dyn TokenStore>,
    capacity: f64,
    refill_rate: f64,
    fail_open: bool,
    key_prefix: String,
}

impl RemoteRateLimiter {
    pub const POLICY_NAME: &'static str = "token-bucket-remote";

    pub fn new(config: &RateLimitConfig, store: Arc<dyn TokenStore>) -> TrafficResult<Self> {
        let errors = validate_rate_limit(config);
        if !errors.is_empty() {
            return Err(TrafficError::Configuration(errors));
        }

        Ok(Self {
            store,
            capacity: config.capacity,
            refill_rate: config.refill_rate_per_second,
            fail_open: config.fail_open,
            key_prefix: config.store_key_prefix.clone(),
        })
    }

    pub fn policy_name(&self) -> &'static str {
        Self::POLICY_NAME
    }

    pub fn fail_open(&self) -> bool {
        self.fail_open
    }

    /// Evict idle buckets from stores that do not expire keys themselves.
    pub fn evict_idle(&self, max_idle: std::time::Duration) -> usize {
        let evicted = self.store.evict_idle(max_idle);
        if evicted > 0 {
            tracing::debug!(evicted, backend = self.store.backend_name(), "Evicted idle token buckets");
            metrics::record_evicted(Self::POLICY_NAME, evicted);
        }
        evicted
    }

    /// Take one token for `key` from the store.
    ///
    /// Returns [`RateCheck::Cancelled`] if `cancel` fires before the store
    /// answers; a cancelled check never reports a denial.
    pub async fn check(&self, key: &str, cancel: &CancellationToken) -> RateCheck {
        if cancel.is_cancelled() {
            return RateCheck::Cancelled;
        }

        let store_key = format!("{}{}", self.key_prefix, key);
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(key = %key, "Rate check cancelled");
                return RateCheck::Cancelled;
            }
            result = self.store.try_acquire(&store_key, self.capacity, self.refill_rate) => result,
        };

        match result {
            Ok(true) => RateCheck::Allowed,
            Ok(false) => {
                tracing::debug!(key = %key, backend = self.store.backend_name(), "Rate limit exceeded");
                metrics::record_rate_limited(self.store.backend_name());
                RateCheck::Denied
            }
            Err(e) => {
                tracing::warn!(
                    key = %key,
                    backend = self.store.backend_name(),
                    fail_open = self.fail_open,
                    error = %e,
                    "Token store unavailable"
                );
                metrics::record_store_error(self.fail_open);
                if self.fail_open {
                    RateCheck::Allowed
                } else {
                    RateCheck::Denied
                }
            }
        }
    }
}
