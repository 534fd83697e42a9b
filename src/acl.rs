//! Principal inference and topic ACL policy
//!
//! The bus does not tell us who published a message, so the publishing
//! principal is inferred from the topic with an ordered list of substring
//! rules. The first rule whose needle occurs in the topic wins; topics that
//! match no rule belong to [`UNKNOWN_PRINCIPAL`].

use crate::error::{Result, SentinelError};
use crate::topic::{topic_matches, validate_pattern};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Principal assigned to topics no rule recognises
pub const UNKNOWN_PRINCIPAL: &str = "unknown";

/// Substring rule mapping a topic to a principal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalRule {
    /// Substring searched for in the topic
    pub contains: String,
    pub principal: String,
}

impl PrincipalRule {
    pub fn new(contains: impl Into<String>, principal: impl Into<String>) -> Self {
        Self {
            contains: contains.into(),
            principal: principal.into(),
        }
    }
}

/// Read-only principal → allowed-pattern mapping
#[derive(Debug, Clone)]
pub struct AclPolicy {
    rules: Vec<PrincipalRule>,
    allowed: BTreeMap<String, Vec<String>>,
}

impl AclPolicy {
    /// Build a policy, rejecting malformed patterns
    pub fn new(rules: Vec<PrincipalRule>, allowed: BTreeMap<String, Vec<String>>) -> Result<Self> {
        for (principal, patterns) in &allowed {
            for pattern in patterns {
                validate_pattern(pattern).map_err(|e| {
                    SentinelError::Config(format!("ACL for '{}': {}", principal, e))
                })?;
            }
        }
        for rule in &rules {
            if rule.contains.is_empty() {
                return Err(SentinelError::Config(format!(
                    "principal rule for '{}' has an empty needle",
                    rule.principal
                )));
            }
        }
        Ok(Self { rules, allowed })
    }

    /// Infer the publishing principal for a topic
    pub fn infer_principal(&self, topic: &str) -> &str {
        self.rules
            .iter()
            .find(|rule| topic.contains(rule.contains.as_str()))
            .map_or(UNKNOWN_PRINCIPAL, |rule| rule.principal.as_str())
    }

    /// Patterns the principal may publish to (empty when unlisted)
    pub fn allowed_patterns(&self, principal: &str) -> &[String] {
        self.allowed.get(principal).map_or(&[], Vec::as_slice)
    }

    /// Whether `principal` may publish to `topic`
    pub fn is_allowed(&self, principal: &str, topic: &str) -> bool {
        self.allowed_patterns(principal)
            .iter()
            .any(|pattern| topic_matches(pattern, topic))
    }
}

/// Principal rules of the reference deployment
pub fn default_principal_rules() -> Vec<PrincipalRule> {
    vec![
        PrincipalRule::new("motion", "motion_user"),
        PrincipalRule::new("intercom", "intercom_user"),
        PrincipalRule::new("light1", "light1_user"),
        PrincipalRule::new("light2", "light2_user"),
        PrincipalRule::new("system", "controller_user"),
        PrincipalRule::new("alerts", "controller_user"),
    ]
}

/// Topic ACL of the reference deployment
pub fn default_acl() -> BTreeMap<String, Vec<String>> {
    let entries: [(&str, &[&str]); 7] = [
        ("motion_user", &["safenest/motion/state"]),
        ("intercom_user", &["safenest/intercom/event"]),
        ("light1_user", &["safenest/light1/state"]),
        ("light2_user", &["safenest/light2/state"]),
        ("panel_user", &["safenest/light1/set", "safenest/light2/set"]),
        ("controller_user", &["safenest/#"]),
        ("security_user", &["safenest/alerts/#"]),
    ];
    entries
        .iter()
        .map(|(principal, patterns)| {
            (
                principal.to_string(),
                patterns.iter().map(|p| p.to_string()).collect(),
            )
        })
        .collect()
}
