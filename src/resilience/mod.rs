//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Before a downstream call:
//!     → circuit_breaker.rs (is_open(key): reject while the dependency is down)
//!
//! After the call:
//!     → circuit_breaker.rs (record_success / record_failure)
//!     → backoff.rs (open duration grows after each failed half-open trial)
//! ```
//!
//! # Design Decisions
//! - Circuits are keyed; one slow dependency never trips another
//! - Time comes from an injected clock so transitions are testable
//! - Backoff is capped; a circuit is never open longer than the configured max

pub mod backoff;
pub mod circuit_breaker;

pub use circuit_breaker::{Admission, CircuitBreakerRegistry, CircuitSnapshot, CircuitState, TrialSlot};
