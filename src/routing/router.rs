//! Gray rule evaluation and rule set replacement.
//!
//! # Responsibilities
//! - Hold the current compiled rule set
//! - Evaluate a request context against it
//! - Validate, compile and swap in new rule sets
//!
//! # Design Decisions
//! - Readers load one immutable snapshot per evaluation (lock-free)
//! - Writers are serialized so versions increase by one per swap
//! - A rejected rule set leaves the current snapshot untouched
//! - Explicit default target rather than a silent no-match

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::schema::GrayConfig;
use crate::config::validation::{validate_gray_rules, ValidationError};
use crate::error::{TrafficError, TrafficResult};
use crate::observability::metrics;
use crate::routing::context::RequestContext;
use crate::routing::matcher::{
    Attribute, AttributeMatcher, CustomMatcher, HeaderMatcher, IpMatcher, Matcher, PercentageMatcher,
    Predicate,
};
use crate::routing::rule::{GrayRule, MatchCriteria};

/// Result of evaluating a request against the rule set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrayDecision {
    /// Rule that selected the target, `None` for the default target.
    pub matched_rule_id: Option<String>,
    pub target: String,
}

#[derive(Debug)]
struct CompiledRule {
    rule: GrayRule,
    matcher: Box<dyn Matcher>,
}

/// An immutable, ordered rule set.
#[derive(Debug)]
pub struct RuleSet {
    version: u64,
    default_target: String,
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn default_target(&self) -> &str {
        &self.default_target
    }

    /// Rules in evaluation order, disabled ones included.
    pub fn rules(&self) -> impl Iterator<Item = &GrayRule> {
        self.rules.iter().map(|compiled| &compiled.rule)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn evaluate(&self, ctx: &RequestContext) -> GrayDecision {
        self.rules
            .iter()
            .filter(|compiled| compiled.rule.enabled)
            .find(|compiled| compiled.matcher.matches(ctx))
            .map(|compiled| GrayDecision {
                matched_rule_id: Some(compiled.rule.id.clone()),
                target: compiled.rule.target.clone(),
            })
            .unwrap_or_else(|| GrayDecision {
                matched_rule_id: None,
                target: self.default_target.clone(),
            })
    }
}

/// Routes requests to targets by the first matching gray rule.
pub struct GrayRouter {
    current: ArcSwap<RuleSet>,
    predicates: DashMap<String, Predicate>,
    swap_lock: Mutex<()>,
}

impl fmt::Debug for GrayRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let current = self.current.load();
        f.debug_struct("GrayRouter")
            .field("version", &current.version)
            .field("default_target", &current.default_target)
            .field("rules", &current.rules.len())
            .field("predicates", &self.predicates.len())
            .finish()
    }
}

impl GrayRouter {
    /// Router with no rules; every request goes to `default_target`.
    pub fn new(default_target: impl Into<String>) -> TrafficResult<Self> {
        let default_target = default_target.into();
        let errors = validate_gray_rules(&default_target, &[]);
        if !errors.is_empty() {
            return Err(TrafficError::Configuration(errors));
        }

        Ok(Self {
            current: ArcSwap::from_pointee(RuleSet {
                version: 0,
                default_target,
                rules: Vec::new(),
            }),
            predicates: DashMap::new(),
            swap_lock: Mutex::new(()),
        })
    }

    /// Router for a configured rule set. Predicates referenced by custom
    /// rules must be passed here.
    pub fn from_config(
        config: &GrayConfig,
        predicates: impl IntoIterator<Item = (String, Predicate)>,
    ) -> TrafficResult<Self> {
        let router = Self::new(config.default_target.clone())?;
        for (name, predicate) in predicates {
            router.predicates.insert(name, predicate);
        }
        router.replace_rules(config.rules.clone())?;
        Ok(router)
    }

    /// Register a predicate for custom rules.
    ///
    /// Rules already swapped in keep the predicate they were compiled with;
    /// re-registering a name takes effect on the next swap.
    pub fn register_predicate<F>(&self, name: impl Into<String>, predicate: F)
    where
        F: Fn(&RequestContext) -> bool + Send + Sync + 'static,
    {
        let name = name.into();
        tracing::debug!(predicate = %name, "Registered gray predicate");
        self.predicates.insert(name, Arc::new(predicate));
    }

    /// Route `ctx`: first enabled rule in (priority, id) order that matches,
    /// else the default target.
    pub fn evaluate(&self, ctx: &RequestContext) -> GrayDecision {
        let snapshot = self.current.load();
        let decision = snapshot.evaluate(ctx);
        metrics::record_rule_match(decision.matched_rule_id.as_deref());
        decision
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<RuleSet> {
        self.current.load_full()
    }

    pub fn version(&self) -> u64 {
        self.current.load().version
    }

    /// Replace all rules, keeping the default target.
    pub fn replace_rules(&self, rules: Vec<GrayRule>) -> TrafficResult<u64> {
        let _guard = self.swap_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let default_target = self.current.load().default_target.clone();
        self.swap(default_target, rules)
    }

    /// Replace the default target and all rules together.
    pub fn replace_config(&self, config: &GrayConfig) -> TrafficResult<u64> {
        let _guard = self.swap_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.swap(config.default_target.clone(), config.rules.clone())
    }

    // Caller holds swap_lock.
    fn swap(&self, default_target: String, rules: Vec<GrayRule>) -> TrafficResult<u64> {
        let compiled = match self.compile(&default_target, &rules) {
            Ok(compiled) => compiled,
            Err(errors) => {
                tracing::warn!(
                    errors = errors.len(),
                    "Rejected gray rule set, keeping current rules"
                );
                return Err(TrafficError::Configuration(errors));
            }
        };

        let mut ordered: Vec<_> = rules.into_iter().zip(compiled).collect();
        ordered.sort_by(|(a, _), (b, _)| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));

        let version = self.current.load().version + 1;
        let rule_set = RuleSet {
            version,
            default_target,
            rules: ordered
                .into_iter()
                .map(|(rule, matcher)| CompiledRule { rule, matcher })
                .collect(),
        };

        tracing::info!(
            version,
            rules = rule_set.rules.len(),
            default_target = %rule_set.default_target,
            "Gray rule set swapped"
        );
        self.current.store(Arc::new(rule_set));
        metrics::record_rule_swap();
        Ok(version)
    }

    fn compile(
        &self,
        default_target: &str,
        rules: &[GrayRule],
    ) -> Result<Vec<Box<dyn Matcher>>, Vec<ValidationError>> {
        let mut errors = validate_gray_rules(default_target, rules);
        let mut matchers = Vec::with_capacity(rules.len());

        for (index, rule) in rules.iter().enumerate() {
            match self.matcher_for(rule) {
                Some(matcher) => matchers.push(matcher),
                None => errors.push(ValidationError::new(
                    format!("gray.rules[{index}].criteria.predicate"),
                    "unknown predicate",
                )),
            }
        }

        if errors.is_empty() {
            Ok(matchers)
        } else {
            Err(errors)
        }
    }

    fn matcher_for(&self, rule: &GrayRule) -> Option<Box<dyn Matcher>> {
        let matcher: Box<dyn Matcher> = match &rule.criteria {
            MatchCriteria::Percentage { percentage, salt } => {
                let salt = salt.clone().unwrap_or_else(|| rule.id.clone());
                Box::new(PercentageMatcher::new(salt, *percentage))
            }
            MatchCriteria::UserId { values } => {
                Box::new(AttributeMatcher::new(Attribute::UserId, values.iter().cloned()))
            }
            MatchCriteria::TenantId { values } => {
                Box::new(AttributeMatcher::new(Attribute::TenantId, values.iter().cloned()))
            }
            MatchCriteria::Header { name, values } => {
                Box::new(HeaderMatcher::new(name.clone(), values.iter().cloned()))
            }
            MatchCriteria::IpAddress { values } => Box::new(IpMatcher::new(values.iter().copied())),
            MatchCriteria::Custom { predicate } => {
                let registered = self.predicates.get(predicate).map(|p| Arc::clone(p.value()))?;
                Box::new(CustomMatcher::new(predicate.clone(), registered))
            }
        };
        Some(matcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn router(rules: Vec<GrayRule>) -> GrayRouter {
        let router = GrayRouter::new("stable").unwrap();
        router.replace_rules(rules).unwrap();
        router
    }

    #[test]
    fn test_no_rules_routes_to_default() {
        let router = GrayRouter::new("stable").unwrap();
        let decision = router.evaluate(&RequestContext::new().with_user("alice"));
        assert_eq!(decision.target, "stable");
        assert_eq!(decision.matched_rule_id, None);
        assert_eq!(router.version(), 0);
    }

    #[test]
    fn test_empty_default_target_rejected() {
        assert!(GrayRouter::new("  ").is_err());
    }

    #[test]
    fn test_priority_order_then_id() {
        let router = router(vec![
            GrayRule::new("z-users", 5, MatchCriteria::user_ids(["alice"]), "v3"),
            GrayRule::new("a-users", 5, MatchCriteria::user_ids(["alice"]), "v2"),
            GrayRule::new("late", 9, MatchCriteria::user_ids(["alice"]), "v4"),
        ]);

        let decision = router.evaluate(&RequestContext::new().with_user("alice"));
        assert_eq!(decision.matched_rule_id.as_deref(), Some("a-users"));
        assert_eq!(decision.target, "v2");

        let order: Vec<_> = router.snapshot().rules().map(|r| r.id.clone()).collect();
        assert_eq!(order, vec!["a-users", "z-users", "late"]);
    }

    #[test]
    fn test_disabled_rules_are_skipped() {
        let router = router(vec![
            GrayRule::new("off", 1, MatchCriteria::user_ids(["alice"]), "v2").disabled(),
            GrayRule::new("on", 2, MatchCriteria::tenant_ids(["acme"]), "v3"),
        ]);

        let ctx = RequestContext::new().with_user("alice").with_tenant("acme");
        assert_eq!(router.evaluate(&ctx).target, "v3");
        assert_eq!(router.evaluate(&RequestContext::new().with_user("alice")).target, "stable");
    }

    #[test]
    fn test_header_and_ip_rules() {
        let ip: IpAddr = "203.0.113.9".parse().unwrap();
        let router = router(vec![
            GrayRule::new("hdr", 1, MatchCriteria::header("X-Canary", ["1"]), "canary"),
            GrayRule::new("office", 2, MatchCriteria::ip_addresses([ip]), "internal"),
        ]);

        assert_eq!(router.evaluate(&RequestContext::new().with_header("x-canary", "1")).target, "canary");
        assert_eq!(router.evaluate(&RequestContext::new().with_ip(ip)).target, "internal");
    }

    #[test]
    fn test_custom_predicate() {
        let router = GrayRouter::new("stable").unwrap();
        router.register_predicate("has-session", |ctx: &RequestContext| ctx.session_id.is_some());
        router
            .replace_rules(vec![GrayRule::new("sess", 1, MatchCriteria::custom("has-session"), "v2")])
            .unwrap();

        assert_eq!(router.evaluate(&RequestContext::new().with_session("s")).target, "v2");
        assert_eq!(router.evaluate(&RequestContext::new()).target, "stable");
    }

    #[test]
    fn test_unknown_predicate_keeps_current_rules() {
        let router = router(vec![GrayRule::new("u", 1, MatchCriteria::user_ids(["bob"]), "v2")]);
        let before = router.version();

        let err = router
            .replace_rules(vec![GrayRule::new("c", 1, MatchCriteria::custom("missing"), "v2")])
            .unwrap_err();
        assert!(err.to_string().contains("unknown predicate"));
        assert_eq!(router.version(), before);
        assert_eq!(router.evaluate(&RequestContext::new().with_user("bob")).target, "v2");
    }

    #[test]
    fn test_invalid_rules_rejected() {
        let router = router(Vec::new());
        let result = router.replace_rules(vec![
            GrayRule::new("dup", 1, MatchCriteria::percentage(10.0), "v2"),
            GrayRule::new("dup", 2, MatchCriteria::percentage(10.0), "v2"),
        ]);
        assert!(matches!(result, Err(TrafficError::Configuration(_))));
        assert!(router.snapshot().is_empty());
    }

    #[test]
    fn test_versions_increase_and_replace_config_swaps_default() {
        let router = router(Vec::new());
        assert_eq!(router.version(), 1);

        let config = GrayConfig {
            default_target: "v1".into(),
            rules: vec![GrayRule::new("u", 1, MatchCriteria::user_ids(["bob"]), "v2")],
        };
        assert_eq!(router.replace_config(&config).unwrap(), 2);
        assert_eq!(router.snapshot().default_target(), "v1");

        router.replace_rules(Vec::new()).unwrap();
        assert_eq!(router.version(), 3);
        assert_eq!(router.evaluate(&RequestContext::new().with_user("bob")).target, "v1");
    }

    #[test]
    fn test_percentage_salt_defaults_to_rule_id() {
        let ctx = RequestContext::new().with_user("user-1");
        let unsalted = router(vec![GrayRule::new("canary", 1, MatchCriteria::percentage(50.0), "v2")]);
        let salted = router(vec![GrayRule::new(
            "other-id",
            1,
            MatchCriteria::Percentage { percentage: 50.0, salt: Some("canary".into()) },
            "v2",
        )]);

        assert_eq!(unsalted.evaluate(&ctx).target, salted.evaluate(&ctx).target);
    }

    #[test]
    fn test_from_config_with_predicates() {
        let config = GrayConfig {
            default_target: "stable".into(),
            rules: vec![GrayRule::new("c", 1, MatchCriteria::custom("always"), "v2")],
        };
        let always: Predicate = Arc::new(|_: &RequestContext| true);
        let router = GrayRouter::from_config(&config, [("always".to_string(), always)]).unwrap();
        assert_eq!(router.evaluate(&RequestContext::new()).target, "v2");

        assert!(GrayRouter::from_config(&config, Vec::<(String, Predicate)>::new()).is_err());
    }
}
