//! Gray rule definitions.
//!
//! Rules are plain data, loaded from configuration or built in code, and
//! compiled into matchers by the router when a rule set is swapped in.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Kind of a gray rule, derived from its criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GrayRuleType {
    Percentage,
    UserId,
    TenantId,
    Header,
    IpAddress,
    Custom,
}

/// What a rule matches on.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchCriteria {
    /// A stable share of identities, in percent (0 to 100, 0.01 resolution).
    Percentage {
        percentage: f64,
        /// Hash salt; defaults to the rule id so rules split independently.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        salt: Option<String>,
    },
    UserId { values: Vec<String> },
    TenantId { values: Vec<String> },
    /// Header value membership; the name is matched case-insensitively.
    Header { name: String, values: Vec<String> },
    IpAddress { values: Vec<IpAddr> },
    /// Named predicate registered on the router.
    Custom { predicate: String },
}

impl MatchCriteria {
    pub fn percentage(percentage: f64) -> Self {
        MatchCriteria::Percentage { percentage, salt: None }
    }

    pub fn user_ids<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MatchCriteria::UserId {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn tenant_ids<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MatchCriteria::TenantId {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn header<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MatchCriteria::Header {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn ip_addresses(values: impl IntoIterator<Item = IpAddr>) -> Self {
        MatchCriteria::IpAddress {
            values: values.into_iter().collect(),
        }
    }

    pub fn custom(predicate: impl Into<String>) -> Self {
        MatchCriteria::Custom {
            predicate: predicate.into(),
        }
    }

    pub fn rule_type(&self) -> GrayRuleType {
        match self {
            MatchCriteria::Percentage { .. } => GrayRuleType::Percentage,
            MatchCriteria::UserId { .. } => GrayRuleType::UserId,
            MatchCriteria::TenantId { .. } => GrayRuleType::TenantId,
            MatchCriteria::Header { .. } => GrayRuleType::Header,
            MatchCriteria::IpAddress { .. } => GrayRuleType::IpAddress,
            MatchCriteria::Custom { .. } => GrayRuleType::Custom,
        }
    }
}

/// A gray routing rule.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GrayRule {
    /// Unique within a rule set.
    pub id: String,

    /// Lower values are evaluated first.
    #[serde(default)]
    pub priority: i32,

    pub criteria: MatchCriteria,

    /// Routing target selected when the rule matches.
    pub target: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl GrayRule {
    pub fn new(
        id: impl Into<String>,
        priority: i32,
        criteria: MatchCriteria,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            priority,
            criteria,
            target: target.into(),
            enabled: true,
        }
    }

    /// The same rule, switched off.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn rule_type(&self) -> GrayRuleType {
        self.criteria.rule_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_from_json() {
        let rule: GrayRule = serde_json::from_str(
            r#"{"id":"eu","criteria":{"type":"header","name":"X-Region","values":["eu"]},"target":"v2"}"#,
        )
        .unwrap();

        assert_eq!(rule.priority, 0);
        assert!(rule.enabled);
        assert_eq!(rule.rule_type(), GrayRuleType::Header);
        assert_eq!(rule.criteria, MatchCriteria::header("X-Region", ["eu"]));
    }

    #[test]
    fn test_unknown_criteria_type_rejected() {
        let result: Result<GrayRule, _> = serde_json::from_str(
            r#"{"id":"x","criteria":{"type":"geo","values":[]},"target":"v2"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_builders() {
        let rule = GrayRule::new("ips", 3, MatchCriteria::ip_addresses(["10.0.0.1".parse().unwrap()]), "v2")
            .disabled();
        assert!(!rule.enabled);
        assert_eq!(rule.rule_type(), GrayRuleType::IpAddress);
        assert_eq!(MatchCriteria::custom("beta").rule_type(), GrayRuleType::Custom);
        assert_eq!(MatchCriteria::tenant_ids(["acme"]).rule_type(), GrayRuleType::TenantId);
    }
}
