//! Shared utilities for integration tests.

use std::path::PathBuf;
use std::sync::Arc;

use traffic_control::clock::{ManualClock, SharedClock};
use traffic_control::config::TrafficConfig;
use traffic_control::routing::{Predicate, RequestContext};
use traffic_control::TrafficCoordinator;

/// Config with small limits that tests can exhaust quickly.
pub fn test_config() -> TrafficConfig {
    let mut config = TrafficConfig::default();
    config.rate_limit.capacity = 5.0;
    config.rate_limit.refill_rate_per_second = 1.0;
    config.circuit_breaker.failure_threshold = 3;
    config.circuit_breaker.open_duration_secs = 10;
    config.circuit_breaker.max_open_duration_secs = 60;
    config.circuit_breaker.half_open_max_trials = 2;
    config
}

/// Build a coordinator on a manual clock.
pub async fn coordinator(config: &TrafficConfig) -> (Arc<TrafficCoordinator>, ManualClock) {
    let clock = ManualClock::new();
    let shared: SharedClock = Arc::new(clock.clone());
    let coordinator = TrafficCoordinator::from_config(config, shared, Vec::<(String, Predicate)>::new())
        .await
        .expect("test config should be valid");
    (Arc::new(coordinator), clock)
}

#[allow(dead_code)]
pub fn user(i: usize) -> RequestContext {
    RequestContext::new().with_user(format!("user-{i}"))
}

/// Scratch file under the system temp dir, removed on drop.
#[allow(dead_code)]
pub struct ScratchFile {
    pub path: PathBuf,
}

#[allow(dead_code)]
impl ScratchFile {
    pub fn new(name: &str, contents: &str) -> Self {
        let path = std::env::temp_dir().join(format!("traffic-control-{}-{name}", std::process::id()));
        std::fs::write(&path, contents).expect("write scratch file");
        Self { path }
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
