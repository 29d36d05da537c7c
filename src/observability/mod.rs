//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All policies produce:
//!     → logging.rs (structured log events: transitions, swaps, store failures)
//!     → metrics.rs (counters by outcome, state, backend)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Hot-path decisions log at debug; state changes log at info/warn
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
