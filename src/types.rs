//! Core types shared by the detectors, the blocker and the bus
//!
//! All types use snake_case JSON serialization to match the alert payloads
//! consumed by the dashboard and HTTP bridge.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Free-form evidence attached to a finding
pub type Evidence = BTreeMap<String, serde_json::Value>;

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warn,
    Critical,
}

impl Severity {
    /// Lowercase name used as the last alert topic segment
    pub fn as_topic_segment(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Critical => "critical",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a classified anomaly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingKind {
    Flood,
    UnauthorizedTopic,
    UnknownTopic,
    MotionAnomaly,
    AuthFailure,
    DosAttack,
    UnauthorizedAccess,
}

impl FindingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingKind::Flood => "FLOOD",
            FindingKind::UnauthorizedTopic => "UNAUTHORIZED_TOPIC",
            FindingKind::UnknownTopic => "UNKNOWN_TOPIC",
            FindingKind::MotionAnomaly => "MOTION_ANOMALY",
            FindingKind::AuthFailure => "AUTH_FAILURE",
            FindingKind::DosAttack => "DOS_ATTACK",
            FindingKind::UnauthorizedAccess => "UNAUTHORIZED_ACCESS",
        }
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single classified anomaly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub severity: Severity,
    /// Topic or IP the finding is about
    pub subject: String,
    /// Human-readable alert message
    pub message: String,
    #[serde(default)]
    pub evidence: Evidence,
}

impl Finding {
    pub fn new(
        kind: FindingKind,
        severity: Severity,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            severity,
            subject: subject.into(),
            message: message.into(),
            evidence: Evidence::new(),
        }
    }

    /// Add an evidence entry
    pub fn with_evidence(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.evidence.insert(key.into(), value.into());
        self
    }
}

/// Classification of a single log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogEventKind {
    AuthFailure,
    DosAttack,
    UnauthorizedAccess,
}

impl LogEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogEventKind::AuthFailure => "AUTH_FAILURE",
            LogEventKind::DosAttack => "DOS_ATTACK",
            LogEventKind::UnauthorizedAccess => "UNAUTHORIZED_ACCESS",
        }
    }

    /// Finding kind reported when this event contributes to a block
    pub fn finding_kind(&self) -> FindingKind {
        match self {
            LogEventKind::AuthFailure => FindingKind::AuthFailure,
            LogEventKind::DosAttack => FindingKind::DosAttack,
            LogEventKind::UnauthorizedAccess => FindingKind::UnauthorizedAccess,
        }
    }
}

impl fmt::Display for LogEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified, attributed log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Unix milliseconds when the line was observed
    pub timestamp: u64,
    pub kind: LogEventKind,
    pub ip: String,
    /// File the line came from
    pub source: String,
    pub line: String,
}

/// An active firewall ban
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEntry {
    pub ip: String,
    pub reason: String,
    /// Unix milliseconds when the ban was applied
    pub created_at: u64,
    pub ttl_secs: u64,
}

impl BlockEntry {
    /// Unix milliseconds at which the ban lapses
    pub fn expires_at(&self) -> u64 {
        self.created_at.saturating_add(self.ttl_secs.saturating_mul(1000))
    }

    /// Whether the ban has lived at least its TTL at `now`
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at()
    }

    /// Seconds left before expiry (0 once expired)
    pub fn remaining_secs(&self, now: u64) -> u64 {
        self.expires_at().saturating_sub(now) / 1000
    }
}

/// A message travelling over the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: bytes::Bytes,
    pub qos: u8,
    pub retain: bool,
}

impl BusMessage {
    /// QoS 1, not retained
    pub fn new(topic: impl Into<String>, payload: impl Into<bytes::Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: 1,
            retain: false,
        }
    }

    pub fn with_qos(mut self, qos: u8) -> Self {
        self.qos = qos;
        self
    }

    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    /// Payload decoded as UTF-8, replacing invalid sequences
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}
