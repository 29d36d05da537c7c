//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the decision
//! core. All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::routing::rule::GrayRule;

/// Root configuration for the traffic-control core.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TrafficConfig {
    /// Circuit breaker thresholds and timings.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Token bucket parameters and backing store.
    pub rate_limit: RateLimitConfig,

    /// Gray routing rules.
    pub gray: GrayConfig,

    /// Derivation of rate and circuit keys from a routing target.
    pub keys: KeyConfig,

    /// Idle record eviction.
    pub eviction: EvictionConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures within the window that open the circuit.
    pub failure_threshold: u32,

    /// Optional failure ratio (0, 1] that also opens the circuit.
    ///
    /// When set, a success in Closed no longer resets the failure count; it
    /// only adds to the throughput the ratio is measured against. Failures
    /// then leave the count only by aging out of the rolling window, so
    /// `failure_threshold` counts failures in the window rather than
    /// consecutive ones.
    pub failure_ratio: Option<f64>,

    /// Length of the failure counting window in seconds.
    pub rolling_window_secs: u64,

    /// Requests required in the window before the circuit may trip.
    pub minimum_throughput: u32,

    /// Base time the circuit stays open, in seconds.
    pub open_duration_secs: u64,

    /// Upper bound for the open duration after backoff, in seconds.
    pub max_open_duration_secs: u64,

    /// Trial requests admitted while half-open.
    pub half_open_max_trials: u32,

    /// Growth factor applied to the open duration when a trial fails.
    /// 1.0 disables backoff.
    pub backoff_multiplier: f64,
}

impl CircuitBreakerConfig {
    pub fn rolling_window(&self) -> Duration {
        Duration::from_secs(self.rolling_window_secs)
    }

    pub fn open_duration(&self) -> Duration {
        Duration::from_secs(self.open_duration_secs)
    }

    pub fn max_open_duration(&self) -> Duration {
        Duration::from_secs(self.max_open_duration_secs)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_ratio: None,
            rolling_window_secs: 60,
            minimum_throughput: 1,
            open_duration_secs: 30,
            max_open_duration_secs: 300,
            half_open_max_trials: 1,
            backoff_multiplier: 2.0,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Bucket capacity (burst size).
    pub capacity: f64,

    /// Tokens added per second.
    pub refill_rate_per_second: f64,

    /// Where bucket state lives.
    pub backend: RateLimitBackend,

    /// Allow requests when the token store fails. Defaults to fail-closed;
    /// only enable for low-criticality policies.
    pub fail_open: bool,

    /// Key prefix used by shared stores.
    pub store_key_prefix: String,

    /// Expiry of idle buckets in shared stores, in seconds.
    pub store_ttl_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 100.0,
            refill_rate_per_second: 50.0,
            backend: RateLimitBackend::Local,
            fail_open: false,
            store_key_prefix: "traffic-control:bucket:".to_string(),
            store_ttl_secs: 3600,
        }
    }
}

/// Backing store for token buckets.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RateLimitBackend {
    /// In-process buckets checked synchronously.
    #[default]
    Local,
    /// In-process store behind the asynchronous store interface.
    Memory,
    /// Buckets shared through Redis (requires the `redis` feature).
    Redis { url: String },
}

/// Gray routing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GrayConfig {
    /// Target used when no rule matches.
    pub default_target: String,

    /// Rules, evaluated by ascending priority.
    pub rules: Vec<GrayRule>,
}

impl Default for GrayConfig {
    fn default() -> Self {
        Self {
            default_target: "stable".to_string(),
            rules: Vec::new(),
        }
    }
}

/// Key derivation for the per-target checks.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct KeyConfig {
    /// Prefix of the rate limiter key for a target.
    pub rate_key_prefix: String,

    /// Prefix of the circuit breaker key for a target.
    pub circuit_key_prefix: String,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            rate_key_prefix: "rate:".to_string(),
            circuit_key_prefix: "downstream:".to_string(),
        }
    }
}

/// Idle record eviction.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EvictionConfig {
    /// Run the background sweeper.
    pub enabled: bool,

    /// Records untouched for this long are dropped, in seconds.
    pub idle_ttl_secs: u64,

    /// Sweep interval in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            idle_ttl_secs: 600,
            sweep_interval_secs: 60,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
