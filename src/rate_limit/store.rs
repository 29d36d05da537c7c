//! Token stores backing the remote limiter.
//!
//! A store owns bucket state on behalf of one or more processes and performs
//! the refill-and-take step atomically per key.

use async_trait::async_trait;
use std::fmt::Debug;
use std::time::Duration;

use crate::clock::{self, SharedClock};
use crate::error::StoreError;
use crate::rate_limit::bucket::BucketTable;

/// Atomic token bucket operations on shared state.
#[async_trait]
pub trait TokenStore: Send + Sync + Debug {
    /// Refill the bucket for `key` and take one token if available.
    ///
    /// Returns `Ok(false)` when the bucket is empty and `Err` only when the
    /// store itself failed.
    async fn try_acquire(&self, key: &str, capacity: f64, refill_rate: f64) -> Result<bool, StoreError>;

    /// Short backend name for logs and metrics labels.
    fn backend_name(&self) -> &'static str;

    /// Drop buckets untouched for at least `max_idle`; returns how many.
    ///
    /// Stores that expire keys on their own keep the default.
    fn evict_idle(&self, _max_idle: Duration) -> usize {
        0
    }
}

/// Store keeping buckets in this process.
///
/// Shares bucket math with the local limiter; useful when several limiters
/// in one process must draw from the same buckets, and in tests.
#[derive(Debug)]
pub struct MemoryTokenStore {
    buckets: BucketTable,
    clock: SharedClock,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::with_clock(clock::system())
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            buckets: BucketTable::new(),
            clock,
        }
    }
}

impl Default for MemoryTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn try_acquire(&self, key: &str, capacity: f64, refill_rate: f64) -> Result<bool, StoreError> {
        Ok(self.buckets.try_acquire(key, capacity, refill_rate, self.clock.now()))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn evict_idle(&self, max_idle: Duration) -> usize {
        self.buckets.evict_idle(max_idle, self.clock.now())
    }
}

impl MemoryTokenStore {
    /// Number of buckets held.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.len() == 0
    }
}

#[cfg(feature = "redis")]
pub use self::redis_store::RedisTokenStore;

#[cfg(feature = "redis")]
mod redis_store {
    use async_trait::async_trait;
    use redis::aio::ConnectionManager;
    use redis::{Client, Script};
    use std::fmt;
    use std::time::Duration;

    use super::TokenStore;
    use crate::error::StoreError;

    // Refill and take in one round trip. Time comes from the Redis server so
    // every process shares one clock. Returns 1 when a token was taken.
    const ACQUIRE_SCRIPT: &str = r"
        local capacity = tonumber(ARGV[1])
        local rate = tonumber(ARGV[2])
        local ttl = tonumber(ARGV[3])
        local t = redis.call('TIME')
        local now = tonumber(t[1]) + tonumber(t[2]) / 1000000

        local state = redis.call('HMGET', KEYS[1], 'tokens', 'ts')
        local tokens = tonumber(state[1])
        local ts = tonumber(state[2])
        if tokens == nil then
            tokens = capacity
            ts = now
        end
        if now > ts then
            tokens = math.min(capacity, tokens + (now - ts) * rate)
            ts = now
        end

        local allowed = 0
        if tokens >= 1 then
            tokens = tokens - 1
            allowed = 1
        end
        redis.call('HSET', KEYS[1], 'tokens', tostring(tokens), 'ts', tostring(ts))
        redis.call('EXPIRE', KEYS[1], ttl)
        return allowed
    ";

    /// Store sharing buckets between processes through Redis.
    pub struct RedisTokenStore {
        connection: ConnectionManager,
        script: Script,
        ttl: Duration,
    }

    impl fmt::Debug for RedisTokenStore {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("RedisTokenStore")
                .field("ttl", &self.ttl)
                .finish_non_exhaustive()
        }
    }

    impl RedisTokenStore {
        /// Connect to Redis at `url`. Idle buckets expire after `ttl`.
        pub async fn connect(url: &str, ttl: Duration) -> Result<Self, StoreError> {
            let client = Client::open(url)?;
            let connection = ConnectionManager::new(client).await.map_err(StoreError::from_redis)?;
            tracing::info!(ttl_secs = ttl.as_secs(), "Connected to Redis token store");

            Ok(Self {
                connection,
                script: Script::new(ACQUIRE_SCRIPT),
                ttl,
            })
        }
    }

    #[async_trait]
    impl TokenStore for RedisTokenStore {
        async fn try_acquire(&self, key: &str, capacity: f64, refill_rate: f64) -> Result<bool, StoreError> {
            // ConnectionManager clones share one multiplexed connection.
            let mut connection = self.connection.clone();
            let allowed: i64 = self
                .script
                .key(key)
                .arg(capacity)
                .arg(refill_rate)
                .arg(self.ttl.as_secs().max(1))
                .invoke_async(&mut connection)
                .await
                .map_err(StoreError::from_redis)?;

            match allowed {
                0 => Ok(false),
                1 => Ok(true),
                other => Err(StoreError::Protocol(format!("unexpected script result {other}"))),
            }
        }

        fn backend_name(&self) -> &'static str {
            "redis"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_memory_store_bucket_math() {
        let clock = ManualClock::new();
        let store = MemoryTokenStore::with_clock(Arc::new(clock.clone()));

        assert!(store.try_acquire("k", 2.0, 1.0).await.unwrap());
        assert!(store.try_acquire("k", 2.0, 1.0).await.unwrap());
        assert!(!store.try_acquire("k", 2.0, 1.0).await.unwrap());

        clock.advance(Duration::from_secs(1));
        assert!(store.try_acquire("k", 2.0, 1.0).await.unwrap());
        assert_eq!(store.backend_name(), "memory");
    }

    #[tokio::test]
    async fn test_memory_store_evicts_idle_buckets() {
        let clock = ManualClock::new();
        let store = MemoryTokenStore::with_clock(Arc::new(clock.clone()));

        for i in 0..1_000 {
            store.try_acquire(&format!("k{i}"), 2.0, 1.0).await.unwrap();
        }
        clock.advance(Duration::from_secs(30));
        store.try_acquire("fresh", 2.0, 1.0).await.unwrap();
        assert_eq!(store.len(), 1_001);

        clock.advance(Duration::from_secs(40));
        assert_eq!(store.evict_idle(Duration::from_secs(60)), 1_000);
        assert_eq!(store.len(), 1);
    }
}
