//! Idle record eviction.
//!
//! # Responsibilities
//! - Periodically drop per-key records nobody has touched for a while
//! - Stop on shutdown
//!
//! Only closed circuits and local buckets are swept. Shared stores expire
//! their keys themselves.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::schema::EvictionConfig;
use crate::rate_limit::RateLimiter;
use crate::resilience::CircuitBreakerRegistry;

pub struct IdleSweeper {
    breaker: Arc<CircuitBreakerRegistry>,
    limiter: Arc<RateLimiter>,
    config: EvictionConfig,
}

impl IdleSweeper {
    pub fn new(
        breaker: Arc<CircuitBreakerRegistry>,
        limiter: Arc<RateLimiter>,
        config: EvictionConfig,
    ) -> Self {
        Self {
            breaker,
            limiter,
            config,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Idle eviction disabled");
            return;
        }

        tracing::info!(
            interval_secs = self.config.sweep_interval_secs,
            idle_ttl_secs = self.config.idle_ttl_secs,
            "Idle sweeper starting"
        );

        let mut ticker = time::interval(Duration::from_secs(self.config.sweep_interval_secs));
        // The first tick completes immediately; nothing is idle yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Idle sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Run one eviction pass. Returns (circuits, buckets) evicted.
    pub fn sweep(&self) -> (usize, usize) {
        let max_idle = Duration::from_secs(self.config.idle_ttl_secs);
        let circuits = self.breaker.evict_idle(max_idle);
        let buckets = self.limiter.evict_idle(max_idle);
        if circuits + buckets > 0 {
            tracing::info!(circuits, buckets, "Idle records evicted");
        }
        (circuits, buckets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::schema::{CircuitBreakerConfig, RateLimitConfig};
    use crate::lifecycle::Shutdown;
    use crate::rate_limit::LocalRateLimiter;

    fn sweeper(enabled: bool) -> (IdleSweeper, ManualClock) {
        let clock = ManualClock::new();
        let shared: crate::clock::SharedClock = Arc::new(clock.clone());
        let breaker =
            CircuitBreakerRegistry::with_clock(CircuitBreakerConfig::default(), Arc::clone(&shared)).unwrap();
        let limiter = LocalRateLimiter::with_clock(&RateLimitConfig::default(), shared).unwrap();
        let config = EvictionConfig {
            enabled,
            idle_ttl_secs: 60,
            sweep_interval_secs: 1,
        };
        (
            IdleSweeper::new(Arc::new(breaker), Arc::new(RateLimiter::Local(limiter)), config),
            clock,
        )
    }

    #[test]
    fn test_sweep_evicts_idle_records() {
        let (sweeper, clock) = sweeper(true);
        sweeper.breaker.record_success("downstream:v1");
        assert!(sweeper.limiter.is_allowed("rate:v1").unwrap());

        assert_eq!(sweeper.sweep(), (0, 0));
        clock.advance(Duration::from_secs(61));
        assert_eq!(sweeper.sweep(), (1, 1));
        assert!(sweeper.breaker.is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (sweeper, _clock) = sweeper(true);
        let shutdown = Shutdown::new();
        let task = tokio::spawn(sweeper.run(shutdown.subscribe()));

        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("sweeper should stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_disabled_sweeper_returns_immediately() {
        let (sweeper, _clock) = sweeper(false);
        let shutdown = Shutdown::new();
        tokio::time::timeout(Duration::from_secs(1), sweeper.run(shutdown.subscribe()))
            .await
            .expect("disabled sweeper should return");
    }
}
