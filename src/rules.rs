//! Classifier rules
//!
//! Pure functions turning an observation (a windowed count, a topic, a log
//! line) into at most one [`Finding`] or [`LogEventKind`]. They hold no
//! state; suppression and counting live in the detector and blocker.

use crate::acl::{AclPolicy, UNKNOWN_PRINCIPAL};
use crate::types::{Finding, FindingKind, LogEventKind, Severity};
use regex::{Regex, RegexBuilder};
use std::collections::BTreeSet;

/// Longest payload excerpt copied into evidence
const PAYLOAD_PREVIEW_CHARS: usize = 100;

/// Flood: more than `threshold` messages on `topic` within `window_secs`
pub fn flood_finding(
    topic: &str,
    principal: &str,
    count: usize,
    threshold: usize,
    window_secs: u64,
) -> Option<Finding> {
    if count <= threshold {
        return None;
    }
    Some(
        Finding::new(
            FindingKind::Flood,
            Severity::Critical,
            topic,
            format!("DoS attack detected on topic: {}", topic),
        )
        .with_evidence("topic", topic)
        .with_evidence("message_count", count)
        .with_evidence("time_window", window_secs)
        .with_evidence("threshold", threshold)
        .with_evidence("client", principal),
    )
}

/// ACL: the inferred principal is unknown or not allowed on `topic`
pub fn acl_finding(
    acl: &AclPolicy,
    principal: &str,
    topic: &str,
    payload: &str,
) -> Option<Finding> {
    if principal == UNKNOWN_PRINCIPAL {
        let preview: String = payload.chars().take(PAYLOAD_PREVIEW_CHARS).collect();
        return Some(
            Finding::new(
                FindingKind::UnauthorizedAccess,
                Severity::Warn,
                topic,
                format!("Unknown client publishing to: {}", topic),
            )
            .with_evidence("topic", topic)
            .with_evidence("client", principal)
            .with_evidence("payload_preview", preview),
        );
    }

    if acl.is_allowed(principal, topic) {
        return None;
    }

    Some(
        Finding::new(
            FindingKind::UnauthorizedAccess,
            Severity::Warn,
            topic,
            format!("Client {} accessing unauthorized topic: {}", principal, topic),
        )
        .with_evidence("topic", topic)
        .with_evidence("client", principal)
        .with_evidence("allowed_topics", acl.allowed_patterns(principal).to_vec()),
    )
}

/// Motion burst: more than `threshold` motion events within `window_secs`
pub fn motion_finding(
    topic: &str,
    count: usize,
    threshold: usize,
    window_secs: u64,
) -> Option<Finding> {
    if count <= threshold {
        return None;
    }
    Some(
        Finding::new(
            FindingKind::MotionAnomaly,
            Severity::Warn,
            topic,
            "Suspicious motion sensor activity detected",
        )
        .with_evidence("event_count", count)
        .with_evidence("time_window", window_secs)
        .with_evidence("threshold", threshold)
        .with_evidence("possible_cause", "sensor malfunction or tampering"),
    )
}

/// Unknown topic: not in the known set and not under the alert prefix
pub fn unknown_topic_finding(
    topic: &str,
    known: &BTreeSet<String>,
    alert_prefix: &str,
) -> Option<Finding> {
    if known.contains(topic) || is_under_prefix(topic, alert_prefix) {
        return None;
    }
    Some(
        Finding::new(
            FindingKind::UnknownTopic,
            Severity::Warn,
            topic,
            format!("Message on unknown topic: {}", topic),
        )
        .with_evidence("topic", topic),
    )
}

fn is_under_prefix(topic: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    topic == prefix
        || topic
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Per-IP violation counts inside the evaluation window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViolationCounts {
    pub auth_failures: usize,
    pub dos_events: usize,
    pub unauthorized_events: usize,
}

impl ViolationCounts {
    pub fn add(&mut self, kind: LogEventKind) {
        match kind {
            LogEventKind::AuthFailure => self.auth_failures += 1,
            LogEventKind::DosAttack => self.dos_events += 1,
            LogEventKind::UnauthorizedAccess => self.unauthorized_events += 1,
        }
    }
}

/// Thresholds deciding when an IP gets blocked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockThresholds {
    pub auth_failures: usize,
    pub dos_events: usize,
    pub unauthorized_events: usize,
}

impl Default for BlockThresholds {
    fn default() -> Self {
        Self {
            auth_failures: 3,
            dos_events: 1,
            unauthorized_events: 5,
        }
    }
}

/// Which rule tripped, in priority order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDecision {
    pub kind: LogEventKind,
    pub reason: String,
}

/// Decide whether the counts warrant a block
///
/// Rules are checked in priority order (auth failures, DoS, unauthorized)
/// and the first one that trips supplies the reason.
pub fn block_decision(
    counts: &ViolationCounts,
    thresholds: &BlockThresholds,
) -> Option<BlockDecision> {
    if counts.auth_failures >= thresholds.auth_failures {
        Some(BlockDecision {
            kind: LogEventKind::AuthFailure,
            reason: format!("{} authentication failures", counts.auth_failures),
        })
    } else if counts.dos_events >= thresholds.dos_events {
        Some(BlockDecision {
            kind: LogEventKind::DosAttack,
            reason: "DoS attack detected".to_string(),
        })
    } else if counts.unauthorized_events >= thresholds.unauthorized_events {
        Some(BlockDecision {
            kind: LogEventKind::UnauthorizedAccess,
            reason: format!("{} unauthorized access attempts", counts.unauthorized_events),
        })
    } else {
        None
    }
}

/// Regex classification of log lines
#[derive(Debug, Clone)]
pub struct LogClassifier {
    ip: Regex,
    categories: Vec<(LogEventKind, Vec<Regex>)>,
}

impl Default for LogClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl LogClassifier {
    pub fn new() -> Self {
        let categories: [(LogEventKind, &[&str]); 3] = [
            (
                LogEventKind::AuthFailure,
                &[
                    "authentication failed",
                    "bad username or password",
                    "not authorized",
                    "connection refused",
                ],
            ),
            (
                LogEventKind::DosAttack,
                &["DOS_ATTACK_DETECTED", "message flooding", "rate limit exceeded"],
            ),
            (LogEventKind::UnauthorizedAccess, &["UNAUTHORIZED_", "ACL denied"]),
        ];

        Self {
            ip: Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").expect("static IPv4 regex"),
            categories: categories
                .iter()
                .map(|(kind, patterns)| {
                    let compiled = patterns
                        .iter()
                        .map(|p| {
                            RegexBuilder::new(&regex::escape(p))
                                .case_insensitive(true)
                                .build()
                                .expect("static classification regex")
                        })
                        .collect();
                    (*kind, compiled)
                })
                .collect(),
        }
    }

    /// First category whose patterns match the line
    pub fn classify(&self, line: &str) -> Option<LogEventKind> {
        self.categories
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|re| re.is_match(line)))
            .map(|(kind, _)| *kind)
    }

    /// First dotted-quad token in the line whose octets are all 0–255
    pub fn extract_ipv4(&self, line: &str) -> Option<String> {
        self.ip
            .find_iter(line)
            .map(|m| m.as_str())
            .find(|token| is_valid_ipv4(token))
            .map(str::to_string)
    }
}

/// Four dot-separated integers, each 0–255
pub fn is_valid_ipv4(token: &str) -> bool {
    let octets: Vec<&str> = token.split('.').collect();
    octets.len() == 4
        && octets
            .iter()
            .all(|o| !o.is_empty() && o.len() <= 3 && o.parse::<u8>().is_ok())
}
