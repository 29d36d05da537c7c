//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → TrafficConfig (validated, immutable)
//!     → handed to the policies at construction
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → gray section swapped into the router atomically
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Only the gray rule set is hot-swappable; policy parameters are fixed
//!   for the lifetime of the per-key records built from them

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::CircuitBreakerConfig;
pub use schema::GrayConfig;
pub use schema::RateLimitBackend;
pub use schema::RateLimitConfig;
pub use schema::TrafficConfig;
pub use validation::ValidationError;
