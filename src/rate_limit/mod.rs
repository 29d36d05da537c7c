//! Rate limiting subsystem.
//!
//! # Data Flow
//! ```text
//! check(key, cancel)
//!     → RateLimiter::Local  → local.rs  (bucket.rs under a per-key lock, never suspends)
//!     → RateLimiter::Remote → remote.rs → store.rs (MemoryTokenStore | RedisTokenStore)
//!     → RateCheck { Allowed | Denied | Cancelled }
//! ```
//!
//! # Design Decisions
//! - The variant is chosen once from configuration; no per-call dispatch by name
//! - Buckets refill on access; there are no timers
//! - Only the local variant answers synchronously
//! - Store failures deny unless the policy is explicitly fail-open

pub mod bucket;
pub mod local;
pub mod remote;
pub mod store;

use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::clock::SharedClock;
use crate::config::schema::{RateLimitBackend, RateLimitConfig};
use crate::error::{TrafficError, TrafficResult};

pub use bucket::RateSnapshot;
pub use local::LocalRateLimiter;
pub use remote::RemoteRateLimiter;
pub use store::{MemoryTokenStore, TokenStore};

#[cfg(feature = "redis")]
pub use store::RedisTokenStore;

/// Result of a rate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateCheck {
    Allowed,
    Denied,
    /// The caller gave up before the store answered.
    Cancelled,
}

/// The rate limiting policy selected by configuration.
#[derive(Debug)]
pub enum RateLimiter {
    Local(LocalRateLimiter),
    Remote(RemoteRateLimiter),
}

impl RateLimiter {
    /// Build the limiter described by `config`.
    ///
    /// Connects to the store for shared backends. A Redis backend without
    /// the `redis` feature is a configuration error.
    pub async fn from_config(config: &RateLimitConfig, clock: SharedClock) -> TrafficResult<Self> {
        match &config.backend {
            RateLimitBackend::Local => Ok(RateLimiter::Local(LocalRateLimiter::with_clock(config, clock)?)),
            RateLimitBackend::Memory => {
                let store = Arc::new(MemoryTokenStore::with_clock(clock));
                Ok(RateLimiter::Remote(RemoteRateLimiter::new(config, store)?))
            }
            RateLimitBackend::Redis { url } => Self::redis(config, url).await,
        }
    }

    #[cfg(feature = "redis")]
    async fn redis(config: &RateLimitConfig, url: &str) -> TrafficResult<Self> {
        let ttl = std::time::Duration::from_secs(config.store_ttl_secs);
        let store = Arc::new(RedisTokenStore::connect(url, ttl).await?);
        Ok(RateLimiter::Remote(RemoteRateLimiter::new(config, store)?))
    }

    #[cfg(not(feature = "redis"))]
    async fn redis(_config: &RateLimitConfig, _url: &str) -> TrafficResult<Self> {
        Err(TrafficError::invalid(
            "rate_limit.backend",
            "redis backend requires the `redis` feature",
        ))
    }

    pub fn policy_name(&self) -> &'static str {
        match self {
            RateLimiter::Local(limiter) => limiter.policy_name(),
            RateLimiter::Remote(limiter) => limiter.policy_name(),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, RateLimiter::Remote(_))
    }

    /// Synchronous check, available for the local variant only.
    pub fn is_allowed(&self, key: &str) -> TrafficResult<bool> {
        match self {
            RateLimiter::Local(limiter) => Ok(limiter.is_allowed(key)),
            RateLimiter::Remote(limiter) => Err(TrafficError::RequiresAsync {
                policy: limiter.policy_name().to_string(),
            }),
        }
    }

    /// Check `key`, suspending on the store for the remote variant.
    pub async fn check(&self, key: &str, cancel: &CancellationToken) -> RateCheck {
        match self {
            RateLimiter::Local(limiter) => {
                if cancel.is_cancelled() {
                    return RateCheck::Cancelled;
                }
                if limiter.is_allowed(key) {
                    RateCheck::Allowed
                } else {
                    RateCheck::Denied
                }
            }
            RateLimiter::Remote(limiter) => limiter.check(key, cancel).await,
        }
    }

    /// Evict idle buckets. Stores with their own key expiry report 0.
    pub fn evict_idle(&self, max_idle: std::time::Duration) -> usize {
        match self {
            RateLimiter::Local(limiter) => limiter.evict_idle(max_idle),
            RateLimiter::Remote(limiter) => limiter.evict_idle(max_idle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{self, ManualClock};

    #[tokio::test]
    async fn test_local_backend_from_config() {
        let limiter = RateLimiter::from_config(&RateLimitConfig::default(), clock::system())
            .await
            .unwrap();
        assert_eq!(limiter.policy_name(), "token-bucket");
        assert!(!limiter.is_remote());
        assert!(limiter.is_allowed("k").unwrap());
        assert_eq!(limiter.check("k", &CancellationToken::new()).await, RateCheck::Allowed);
    }

    #[tokio::test]
    async fn test_memory_backend_requires_async() {
        let config = RateLimitConfig {
            backend: RateLimitBackend::Memory,
            ..RateLimitConfig::default()
        };
        let limiter = RateLimiter::from_config(&config, clock::system()).await.unwrap();

        assert!(limiter.is_remote());
        assert!(matches!(limiter.is_allowed("k"), Err(TrafficError::RequiresAsync { .. })));
        assert_eq!(limiter.check("k", &CancellationToken::new()).await, RateCheck::Allowed);
    }

    #[tokio::test]
    async fn test_memory_backend_evicts_idle_buckets() {
        let clock = ManualClock::new();
        let config = RateLimitConfig {
            backend: RateLimitBackend::Memory,
            ..RateLimitConfig::default()
        };
        let limiter = RateLimiter::from_config(&config, Arc::new(clock.clone())).await.unwrap();
        let cancel = CancellationToken::new();

        for i in 0..100 {
            assert_eq!(limiter.check(&format!("k{i}"), &cancel).await, RateCheck::Allowed);
        }
        clock.advance(std::time::Duration::from_secs(86_400));
        assert_eq!(limiter.evict_idle(std::time::Duration::from_secs(60)), 100);
        assert_eq!(limiter.evict_idle(std::time::Duration::from_secs(60)), 0);
    }

    #[tokio::test]
    async fn test_cancelled_local_check() {
        let limiter = RateLimiter::from_config(&RateLimitConfig::default(), clock::system())
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(limiter.check("k", &cancel).await, RateCheck::Cancelled);
    }

    #[cfg(not(feature = "redis"))]
    #[tokio::test]
    async fn test_redis_backend_without_feature() {
        let config = RateLimitConfig {
            backend: RateLimitBackend::Redis { url: "redis://127.0.0.1/".into() },
            ..RateLimitConfig::default()
        };
        let err = RateLimiter::from_config(&config, clock::system()).await.unwrap_err();
        assert!(err.to_string().contains("rate_limit.backend"));
    }
}
