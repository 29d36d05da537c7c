//! Traffic-control decision core.
//!
//! Admission control for a gateway: on every inbound request, decide whether
//! to allow it, deny it, or send it to a gray (canary) target.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌──────────────────────────────────────────────────────┐
//!                  │                 TrafficCoordinator                    │
//!   RequestContext │  ┌──────────┐   ┌─────────────┐   ┌────────────────┐  │  Decision
//!   ───────────────┼─▶│ routing  │──▶│ rate_limit  │──▶│  resilience    │──┼──────────▶
//!                  │  │GrayRouter│   │ RateLimiter │   │CircuitBreaker  │  │ + handle
//!                  │  └──────────┘   └─────────────┘   └───────▲────────┘  │
//!                  │                                          │           │
//!                  │                 CompletionHandle ────────┘           │
//!                  │                                                      │
//!                  │  ┌────────────────────────────────────────────────┐  │
//!                  │  │            Cross-Cutting Concerns               │  │
//!                  │  │  config │ clock │ observability │ lifecycle     │  │
//!                  │  └────────────────────────────────────────────────┘  │
//!                  └──────────────────────────────────────────────────────┘
//! ```

// Policies
pub mod admission;
pub mod rate_limit;
pub mod resilience;
pub mod routing;

// Cross-cutting concerns
pub mod clock;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod observability;

pub use admission::{CompletionHandle, Decision, Outcome, TrafficCoordinator};
pub use config::schema::TrafficConfig;
pub use error::{TrafficError, TrafficResult};
pub use lifecycle::Shutdown;
