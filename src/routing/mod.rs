//! Gray routing subsystem.
//!
//! # Data Flow
//! ```text
//! RequestContext (ip, user, tenant, session, headers)
//!     → router.rs (load current RuleSet snapshot)
//!     → matcher.rs (evaluate enabled rules in priority order)
//!     → Return: GrayDecision { matched rule or none, target }
//!
//! Rule Set Replacement (config reload or API call):
//!     GrayRule[]
//!     → Validate (ids, targets, ranges, predicates)
//!     → Sort by (priority, id)
//!     → Compile matchers (sets, hash salt, predicates)
//!     → Atomic pointer swap
//! ```
//!
//! # Design Decisions
//! - Rule sets are immutable; replacement is copy-on-write
//! - Deterministic: same context and rule set always give the same target
//! - First match wins (ordered by priority, then id)
//! - Percentage rules are sticky per identity

pub mod context;
pub mod matcher;
pub mod router;
pub mod rule;

pub use context::RequestContext;
pub use matcher::Predicate;
pub use router::{GrayDecision, GrayRouter, RuleSet};
pub use rule::{GrayRule, GrayRuleType, MatchCriteria};
