//! Request context seen by the router.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;

/// Attributes of one inbound request.
///
/// Built by the caller (gateway, proxy) from whatever it knows about the
/// request; every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RequestContext {
    pub ip: Option<IpAddr>,
    pub user_id: Option<String>,
    pub tenant_id: Option<String>,
    pub session_id: Option<String>,
    pub headers: HashMap<String, String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.ip = Some(ip);
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Identity used for sticky percentage bucketing: session, then user,
    /// then client IP.
    pub fn sticky_identity(&self) -> Option<String> {
        self.session_id
            .clone()
            .or_else(|| self.user_id.clone())
            .or_else(|| self.ip.map(|ip| ip.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_ignores_case() {
        let ctx = RequestContext::new().with_header("X-Canary", "on");
        assert_eq!(ctx.header("x-canary"), Some("on"));
        assert_eq!(ctx.header("X-CANARY"), Some("on"));
        assert_eq!(ctx.header("x-other"), None);
    }

    #[test]
    fn test_sticky_identity_precedence() {
        let ip: IpAddr = "192.0.2.7".parse().unwrap();
        assert_eq!(RequestContext::new().sticky_identity(), None);
        assert_eq!(RequestContext::new().with_ip(ip).sticky_identity().as_deref(), Some("192.0.2.7"));

        let ctx = RequestContext::new().with_ip(ip).with_user("alice");
        assert_eq!(ctx.sticky_identity().as_deref(), Some("alice"));
        assert_eq!(ctx.with_session("s-1").sticky_identity().as_deref(), Some("s-1"));
    }

    #[test]
    fn test_deserialize_partial_context() {
        let ctx: RequestContext = serde_json::from_str(r#"{"user_id":"bob","ip":"::1"}"#).unwrap();
        assert_eq!(ctx.user_id.as_deref(), Some("bob"));
        assert_eq!(ctx.ip, Some("::1".parse().unwrap()));
        assert!(ctx.headers.is_empty());
    }
}
