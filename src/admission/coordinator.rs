//! Traffic decision coordinator.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::admission::decision::{CompletionHandle, Decision, Outcome};
use crate::clock::SharedClock;
use crate::config::schema::{KeyConfig, TrafficConfig};
use crate::config::validation::validate_config;
use crate::error::{TrafficError, TrafficResult};
use crate::observability::metrics;
use crate::rate_limit::{RateCheck, RateLimiter};
use crate::resilience::{Admission, CircuitBreakerRegistry};
use crate::routing::{GrayDecision, GrayRouter, Predicate, RequestContext};

/// Combines gray routing, rate limiting and circuit breaking into one
/// verdict per request.
///
/// The coordinator never records request outcomes itself; callers report
/// them through the [`CompletionHandle`] of an allowed decision.
#[derive(Debug)]
pub struct TrafficCoordinator {
    router: Arc<GrayRouter>,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreakerRegistry>,
    keys: KeyConfig,
}

impl TrafficCoordinator {
    pub fn new(
        router: Arc<GrayRouter>,
        limiter: Arc<RateLimiter>,
        breaker: Arc<CircuitBreakerRegistry>,
        keys: KeyConfig,
    ) -> Self {
        Self {
            router,
            limiter,
            breaker,
            keys,
        }
    }

    /// Build all three policies from one configuration.
    ///
    /// Connects to the token store for shared rate limit backends.
    pub async fn from_config(
        config: &TrafficConfig,
        clock: SharedClock,
        predicates: impl IntoIterator<Item = (String, Predicate)>,
    ) -> TrafficResult<Self> {
        validate_config(config).map_err(TrafficError::Configuration)?;

        let router = GrayRouter::from_config(&config.gray, predicates)?;
        let breaker = CircuitBreakerRegistry::with_clock(config.circuit_breaker.clone(), clock.clone())?;
        let limiter = RateLimiter::from_config(&config.rate_limit, clock).await?;

        tracing::info!(
            rate_limiter = limiter.policy_name(),
            circuit_breaker = breaker.policy_name(),
            gray_rules = config.gray.rules.len(),
            "Traffic coordinator ready"
        );

        Ok(Self::new(
            Arc::new(router),
            Arc::new(limiter),
            Arc::new(breaker),
            config.keys.clone(),
        ))
    }

    pub fn router(&self) -> &Arc<GrayRouter> {
        &self.router
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn breaker(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breaker
    }

    pub fn rate_key_for(&self, target: &str) -> String {
        format!("{}{}", self.keys.rate_key_prefix, target)
    }

    pub fn circuit_key_for(&self, target: &str) -> String {
        format!("{}{}", self.keys.circuit_key_prefix, target)
    }

    /// Decide on a request: route, then rate limit the target, then check
    /// the target's circuit.
    ///
    /// May suspend on a shared token store; `cancel` ends the wait with
    /// [`Outcome::Cancelled`].
    pub async fn decide(&self, ctx: &RequestContext, cancel: &CancellationToken) -> Decision {
        let gray = self.router.evaluate(ctx);
        let rate_key = self.rate_key_for(&gray.target);

        let decision = match self.limiter.check(&rate_key, cancel).await {
            RateCheck::Allowed => self.check_circuit(gray),
            RateCheck::Denied => Decision::denied(Outcome::DenyRateLimited, gray.target, gray.matched_rule_id),
            RateCheck::Cancelled => Decision::denied(Outcome::Cancelled, gray.target, gray.matched_rule_id),
        };
        self.observe(&decision);
        decision
    }

    /// Synchronous variant of [`decide`](Self::decide) for local rate
    /// limiters. Store-backed limiters yield [`TrafficError::RequiresAsync`].
    pub fn decide_now(&self, ctx: &RequestContext) -> TrafficResult<Decision> {
        if self.limiter.is_remote() {
            return Err(TrafficError::RequiresAsync {
                policy: self.limiter.policy_name().to_string(),
            });
        }

        let gray = self.router.evaluate(ctx);
        let rate_key = self.rate_key_for(&gray.target);

        let decision = if self.limiter.is_allowed(&rate_key)? {
            self.check_circuit(gray)
        } else {
            Decision::denied(Outcome::DenyRateLimited, gray.target, gray.matched_rule_id)
        };
        self.observe(&decision);
        Ok(decision)
    }

    fn check_circuit(&self, gray: GrayDecision) -> Decision {
        let circuit_key = self.circuit_key_for(&gray.target);
        let breaker = Arc::clone(&self.breaker);
        let completion = match self.breaker.admit(&circuit_key) {
            Admission::Rejected => {
                return Decision::denied(Outcome::DenyCircuitOpen, gray.target, gray.matched_rule_id);
            }
            Admission::Admitted => CompletionHandle::new(breaker, circuit_key),
            Admission::Trial(slot) => CompletionHandle::trial(breaker, circuit_key, slot),
        };

        Decision {
            outcome: Outcome::Allow,
            target: gray.target,
            matched_rule_id: gray.matched_rule_id,
            completion: Some(completion),
        }
    }

    fn observe(&self, decision: &Decision) {
        tracing::debug!(
            outcome = decision.outcome.as_str(),
            target = %decision.target,
            rule = ?decision.matched_rule_id,
            "Traffic decision"
        );
        metrics::record_decision(decision.outcome.as_str());
    }
}
