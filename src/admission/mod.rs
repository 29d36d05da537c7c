//! Admission subsystem.
//!
//! # Data Flow
//! ```text
//! RequestContext
//!     → GrayRouter::evaluate            → target (+ matched rule)
//!     → RateLimiter::check(rate:<target>)       → DenyRateLimited | Cancelled
//!     → CircuitBreaker::is_open(downstream:<target>) → DenyCircuitOpen
//!     → Allow + CompletionHandle
//!
//! Caller, after the downstream call:
//!     CompletionHandle::success() / failure() → CircuitBreaker::record_*
//!
//! Background (sweeper.rs):
//!     every sweep_interval → evict idle circuits and buckets
//! ```
//!
//! # Design Decisions
//! - One verdict per request; deny reasons are outcomes, not errors
//! - Rate and circuit keys derive from the routed target, so a canary has
//!   its own budget and its own circuit
//! - The completion handle is consumed on use; double reporting cannot compile

pub mod coordinator;
pub mod decision;
pub mod sweeper;

pub use coordinator::TrafficCoordinator;
pub use decision::{CompletionHandle, Decision, Outcome, RequestOutcome};
pub use sweeper::IdleSweeper;
