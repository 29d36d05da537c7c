//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds, windows, capacities > 0)
//! - Validate gray rules (unique ids, targets, criteria ranges)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Invalid values are rejected, never clamped
//! - The same checks run when a policy is constructed directly and when a
//!   rule set is swapped at runtime

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{
    CircuitBreakerConfig, EvictionConfig, ObservabilityConfig, RateLimitConfig, TrafficConfig,
};
use crate::routing::rule::{GrayRule, MatchCriteria};

/// A single rejected configuration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a complete configuration.
pub fn validate_config(config: &TrafficConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    errors.extend(validate_circuit_breaker(&config.circuit_breaker));
    errors.extend(validate_rate_limit(&config.rate_limit));
    errors.extend(validate_gray_rules(&config.gray.default_target, &config.gray.rules));
    errors.extend(validate_eviction(&config.eviction));
    errors.extend(validate_observability(&config.observability));

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate circuit breaker parameters.
pub fn validate_circuit_breaker(config: &CircuitBreakerConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let field = |name: &str| format!("circuit_breaker.{name}");

    if config.failure_threshold == 0 {
        errors.push(ValidationError::new(field("failure_threshold"), "must be greater than 0"));
    }
    if let Some(ratio) = config.failure_ratio {
        if !ratio.is_finite() || ratio <= 0.0 || ratio > 1.0 {
            errors.push(ValidationError::new(field("failure_ratio"), "must be in (0, 1]"));
        }
    }
    if config.rolling_window_secs == 0 {
        errors.push(ValidationError::new(field("rolling_window_secs"), "must be greater than 0"));
    }
    if config.open_duration_secs == 0 {
        errors.push(ValidationError::new(field("open_duration_secs"), "must be greater than 0"));
    }
    if config.max_open_duration_secs < config.open_duration_secs {
        errors.push(ValidationError::new(
            field("max_open_duration_secs"),
            "must not be smaller than open_duration_secs",
        ));
    }
    if config.half_open_max_trials == 0 {
        errors.push(ValidationError::new(field("half_open_max_trials"), "must be greater than 0"));
    }
    if !config.backoff_multiplier.is_finite() || config.backoff_multiplier < 1.0 {
        errors.push(ValidationError::new(field("backoff_multiplier"), "must be at least 1.0"));
    }

    errors
}

/// Validate token bucket parameters.
pub fn validate_rate_limit(config: &RateLimitConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if !config.capacity.is_finite() || config.capacity < 1.0 {
        errors.push(ValidationError::new("rate_limit.capacity", "must be at least 1"));
    }
    if !config.refill_rate_per_second.is_finite() || config.refill_rate_per_second <= 0.0 {
        errors.push(ValidationError::new(
            "rate_limit.refill_rate_per_second",
            "must be greater than 0",
        ));
    }
    if config.store_ttl_secs == 0 {
        errors.push(ValidationError::new("rate_limit.store_ttl_secs", "must be greater than 0"));
    }

    errors
}

/// Validate a gray rule set together with its default target.
pub fn validate_gray_rules(default_target: &str, rules: &[GrayRule]) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    if default_target.trim().is_empty() {
        errors.push(ValidationError::new("gray.default_target", "must not be empty"));
    }

    for (index, rule) in rules.iter().enumerate() {
        let field = |name: &str| format!("gray.rules[{index}].{name}");

        if rule.id.trim().is_empty() {
            errors.push(ValidationError::new(field("id"), "must not be empty"));
        } else if !seen.insert(rule.id.as_str()) {
            errors.push(ValidationError::new(field("id"), format!("duplicate rule id `{}`", rule.id)));
        }
        if rule.target.trim().is_empty() {
            errors.push(ValidationError::new(field("target"), "must not be empty"));
        }

        match &rule.criteria {
            MatchCriteria::Percentage { percentage, .. } => {
                if !percentage.is_finite() || *percentage < 0.0 || *percentage > 100.0 {
                    errors.push(ValidationError::new(field("criteria.percentage"), "must be in [0, 100]"));
                }
            }
            MatchCriteria::UserId { values } | MatchCriteria::TenantId { values } => {
                if values.is_empty() {
                    errors.push(ValidationError::new(field("criteria.values"), "must not be empty"));
                }
            }
            MatchCriteria::Header { name, values } => {
                if name.trim().is_empty() {
                    errors.push(ValidationError::new(field("criteria.name"), "must not be empty"));
                }
                if values.is_empty() {
                    errors.push(ValidationError::new(field("criteria.values"), "must not be empty"));
                }
            }
            MatchCriteria::IpAddress { values } => {
                if values.is_empty() {
                    errors.push(ValidationError::new(field("criteria.values"), "must not be empty"));
                }
            }
            MatchCriteria::Custom { predicate } => {
                if predicate.trim().is_empty() {
                    errors.push(ValidationError::new(field("criteria.predicate"), "must not be empty"));
                }
            }
        }
    }

    errors
}

fn validate_eviction(config: &EvictionConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if config.enabled {
        if config.idle_ttl_secs == 0 {
            errors.push(ValidationError::new("eviction.idle_ttl_secs", "must be greater than 0"));
        }
        if config.sweep_interval_secs == 0 {
            errors.push(ValidationError::new("eviction.sweep_interval_secs", "must be greater than 0"));
        }
    }
    errors
}

fn validate_observability(config: &ObservabilityConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if config.metrics_enabled && config.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("`{}` is not a socket address", config.metrics_address),
        ));
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&TrafficConfig::default()).is_ok());
    }

    #[test]
    fn test_reports_all_errors() {
        let mut config = TrafficConfig::default();
        config.circuit_breaker.failure_threshold = 0;
        config.circuit_breaker.rolling_window_secs = 0;
        config.rate_limit.capacity = 0.0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "circuit_breaker.failure_threshold",
                "circuit_breaker.rolling_window_secs",
                "rate_limit.capacity",
            ]
        );
    }

    #[test]
    fn test_circuit_breaker_ranges() {
        let config = CircuitBreakerConfig {
            failure_ratio: Some(1.5),
            half_open_max_trials: 0,
            backoff_multiplier: 0.5,
            open_duration_secs: 30,
            max_open_duration_secs: 10,
            ..CircuitBreakerConfig::default()
        };
        let errors = validate_circuit_breaker(&config);
        assert_eq!(errors.len(), 4);
    }

    #[test]
    fn test_gray_rule_checks() {
        let rules = vec![
            GrayRule::new("a", 1, MatchCriteria::percentage(30.0), "v2"),
            GrayRule::new("a", 2, MatchCriteria::percentage(130.0), "v2"),
            GrayRule::new("b", 3, MatchCriteria::user_ids(Vec::<String>::new()), ""),
        ];
        let errors = validate_gray_rules("stable", &rules);
        let messages: Vec<_> = errors.iter().map(ToString::to_string).collect();
        assert_eq!(
            messages,
            vec![
                "gray.rules[1].id: duplicate rule id `a`",
                "gray.rules[1].criteria.percentage: must be in [0, 100]",
                "gray.rules[2].target: must not be empty",
                "gray.rules[2].criteria.values: must not be empty",
            ]
        );
    }

    #[test]
    fn test_metrics_address_checked_only_when_enabled() {
        let mut config = TrafficConfig::default();
        config.observability.metrics_address = "not-an-address".into();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        assert!(validate_config(&config).is_err());
    }
}
