//! Rule matching logic.
//!
//! # Responsibilities
//! - Percentage: sticky hash bucket of the request identity
//! - Attribute sets: user id, tenant id, client IP
//! - Header value membership (name matched case-insensitively)
//! - Custom: registered predicate
//!
//! # Design Decisions
//! - Matchers are compiled once per rule set swap, never per request
//! - Sets are pre-built so membership is O(1)
//! - Missing attributes never match
//! - Hashing uses SHA-256 so buckets are stable across processes and releases

use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use crate::routing::context::RequestContext;

/// Predicate registered under a name and referenced by custom rules.
pub type Predicate = Arc<dyn Fn(&RequestContext) -> bool + Send + Sync>;

/// Trait for matching requests against a rule's criteria.
pub trait Matcher: Send + Sync + fmt::Debug {
    /// Returns true if the request matches this condition.
    fn matches(&self, ctx: &RequestContext) -> bool;
}

/// Number of buckets in [0, 100) at 0.01 resolution.
const BUCKETS: u64 = 10_000;

/// Stable bucket of `identity` under `salt`, in [0, 100).
pub fn percentage_bucket(salt: &str, identity: &str) -> f64 {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(identity.as_bytes());
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let value = u64::from_be_bytes(prefix);
    (value % BUCKETS) as f64 / 100.0
}

/// Matches a stable share of request identities.
#[derive(Debug, Clone)]
pub struct PercentageMatcher {
    salt: String,
    percentage: f64,
}

impl PercentageMatcher {
    pub fn new(salt: impl Into<String>, percentage: f64) -> Self {
        Self {
            salt: salt.into(),
            percentage,
        }
    }
}

impl Matcher for PercentageMatcher {
    fn matches(&self, ctx: &RequestContext) -> bool {
        match ctx.sticky_identity() {
            Some(identity) => percentage_bucket(&self.salt, &identity) < self.percentage,
            None => false,
        }
    }
}

/// Request attribute a set matcher looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    UserId,
    TenantId,
}

/// Matches when the attribute is one of the configured values.
#[derive(Debug, Clone)]
pub struct AttributeMatcher {
    attribute: Attribute,
    values: HashSet<String>,
}

impl AttributeMatcher {
    pub fn new(attribute: Attribute, values: impl IntoIterator<Item = String>) -> Self {
        Self {
            attribute,
            values: values.into_iter().collect(),
        }
    }
}

impl Matcher for AttributeMatcher {
    fn matches(&self, ctx: &RequestContext) -> bool {
        let value = match self.attribute {
            Attribute::UserId => ctx.user_id.as_deref(),
            Attribute::TenantId => ctx.tenant_id.as_deref(),
        };
        value.is_some_and(|v| self.values.contains(v))
    }
}

/// Matches the client IP against a set of addresses.
#[derive(Debug, Clone)]
pub struct IpMatcher {
    addresses: HashSet<IpAddr>,
}

impl IpMatcher {
    pub fn new(addresses: impl IntoIterator<Item = IpAddr>) -> Self {
        Self {
            addresses: addresses.into_iter().collect(),
        }
    }
}

impl Matcher for IpMatcher {
    fn matches(&self, ctx: &RequestContext) -> bool {
        ctx.ip.is_some_and(|ip| self.addresses.contains(&ip))
    }
}

/// Matches when a header carries one of the configured values.
#[derive(Debug, Clone)]
pub struct HeaderMatcher {
    name: String,
    values: HashSet<String>,
}

impl HeaderMatcher {
    pub fn new(name: impl Into<String>, values: impl IntoIterator<Item = String>) -> Self {
        Self {
            name: name.into(),
            values: values.into_iter().collect(),
        }
    }
}

impl Matcher for HeaderMatcher {
    fn matches(&self, ctx: &RequestContext) -> bool {
        ctx.header(&self.name).is_some_and(|v| self.values.contains(v))
    }
}

/// Delegates to a registered predicate.
pub struct CustomMatcher {
    name: String,
    predicate: Predicate,
}

impl CustomMatcher {
    pub fn new(name: impl Into<String>, predicate: Predicate) -> Self {
        Self {
            name: name.into(),
            predicate,
        }
    }
}

impl fmt::Debug for CustomMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomMatcher").field("name", &self.name).finish_non_exhaustive()
    }
}

impl Matcher for CustomMatcher {
    fn matches(&self, ctx: &RequestContext) -> bool {
        (self.predicate)(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_is_stable_and_in_range() {
        let a = percentage_bucket("canary", "user-42");
        assert_eq!(a, percentage_bucket("canary", "user-42"));
        assert!((0.0..100.0).contains(&a));
    }

    #[test]
    fn test_salt_changes_bucket_assignment() {
        let differs = (0..100)
            .map(|i| format!("user-{i}"))
            .filter(|id| percentage_bucket("a", id) != percentage_bucket("b", id))
            .count();
        assert!(differs > 90);
    }

    #[test]
    fn test_percentage_edges() {
        let ctx = RequestContext::new().with_user("alice");
        assert!(!PercentageMatcher::new("r", 0.0).matches(&ctx));
        assert!(PercentageMatcher::new("r", 100.0).matches(&ctx));
        assert!(!PercentageMatcher::new("r", 100.0).matches(&RequestContext::new()));
    }

    #[test]
    fn test_attribute_matcher() {
        let matcher = AttributeMatcher::new(Attribute::TenantId, vec!["acme".to_string()]);
        assert!(matcher.matches(&RequestContext::new().with_tenant("acme")));
        assert!(!matcher.matches(&RequestContext::new().with_tenant("globex")));
        assert!(!matcher.matches(&RequestContext::new().with_user("acme")));
    }

    #[test]
    fn test_ip_matcher() {
        let ip: IpAddr = "10.1.2.3".parse().unwrap();
        let matcher = IpMatcher::new([ip]);
        assert!(matcher.matches(&RequestContext::new().with_ip(ip)));
        assert!(!matcher.matches(&RequestContext::new()));
    }

    #[test]
    fn test_header_matcher() {
        let matcher = HeaderMatcher::new("x-canary", vec!["true".to_string()]);
        assert!(matcher.matches(&RequestContext::new().with_header("X-Canary", "true")));
        assert!(!matcher.matches(&RequestContext::new().with_header("X-Canary", "TRUE")));
    }

    #[test]
    fn test_custom_matcher() {
        let predicate: Predicate = Arc::new(|ctx: &RequestContext| ctx.user_id.as_deref() == Some("root"));
        let matcher = CustomMatcher::new("is-root", predicate);
        assert!(matcher.matches(&RequestContext::new().with_user("root")));
        assert!(!matcher.matches(&RequestContext::new()));
        assert!(format!("{matcher:?}").contains("is-root"));
    }
}
