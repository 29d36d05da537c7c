//! Startup orchestration.
//!
//! # Responsibilities
//! - Start the metrics exporter when enabled
//! - Build the policies from configuration
//! - Start background tasks (idle sweeper)
//!
//! # Design Decisions
//! - Fail fast: an invalid policy configuration is fatal
//! - A metrics exporter that cannot bind is logged, not fatal
//! - Subsystems initialize in order, not concurrently

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::admission::{IdleSweeper, TrafficCoordinator};
use crate::clock::SharedClock;
use crate::config::schema::TrafficConfig;
use crate::error::TrafficResult;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::routing::Predicate;

/// Running services handed back to the caller.
#[derive(Debug)]
pub struct Services {
    pub coordinator: Arc<TrafficCoordinator>,
    pub sweeper: JoinHandle<()>,
}

/// Start everything described by `config`.
pub async fn start(
    config: &TrafficConfig,
    clock: SharedClock,
    predicates: impl IntoIterator<Item = (String, Predicate)>,
    shutdown: &Shutdown,
) -> TrafficResult<Services> {
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(address = %addr, error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let coordinator = Arc::new(TrafficCoordinator::from_config(config, clock, predicates).await?);

    let sweeper = IdleSweeper::new(
        Arc::clone(coordinator.breaker()),
        Arc::clone(coordinator.limiter()),
        config.eviction.clone(),
    );
    let sweeper = tokio::spawn(sweeper.run(shutdown.subscribe()));

    Ok(Services { coordinator, sweeper })
}
