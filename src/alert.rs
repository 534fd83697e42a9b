//! Alert publication and security-event logging
//!
//! Findings go out on `<prefix>/<severity>` as a flat JSON object:
//!
//! ```json
//! {"timestamp": "2024-01-01T12:00:00.000Z", "source": "anomaly_detector",
//!  "message": "...", "severity": "WARN", "kind": "UNKNOWN_TOPIC",
//!  "subject": "safenest/garage", "topic": "safenest/garage"}
//! ```
//!
//! Evidence keys are merged into the top level; the envelope fields win on
//! a name clash. Publishing is bounded by a timeout and never retried.

use crate::clock::Clock;
use crate::error::{Result, SentinelError};
use crate::provider::BusProvider;
use crate::stats::EngineStats;
use crate::types::{BusMessage, Evidence, Finding, Severity};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Publishes findings and lifecycle notices to the alert channel
pub struct AlertPublisher {
    provider: Arc<dyn BusProvider>,
    prefix: String,
    timeout: Duration,
    clock: Arc<dyn Clock>,
    stats: Arc<EngineStats>,
}

impl AlertPublisher {
    pub fn new(
        provider: Arc<dyn BusProvider>,
        prefix: impl Into<String>,
        timeout: Duration,
        clock: Arc<dyn Clock>,
        stats: Arc<EngineStats>,
    ) -> Self {
        let prefix: String = prefix.into();
        Self {
            provider,
            prefix: prefix.trim_end_matches('/').to_string(),
            timeout,
            clock,
            stats,
        }
    }

    /// Topic alerts of this severity are published on
    pub fn topic_for(&self, severity: Severity) -> String {
        format!("{}/{}", self.prefix, severity.as_topic_segment())
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Alert body for a finding
    pub fn finding_payload(&self, source: &str, finding: &Finding) -> Value {
        self.payload(
            source,
            &finding.message,
            finding.severity,
            Some(finding),
            &finding.evidence,
        )
    }

    fn payload(
        &self,
        source: &str,
        message: &str,
        severity: Severity,
        finding: Option<&Finding>,
        evidence: &Evidence,
    ) -> Value {
        let mut body: Map<String, Value> = evidence
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        body.insert("timestamp".into(), Value::String(format_timestamp(self.clock.now_millis())));
        body.insert("source".into(), Value::String(source.to_string()));
        body.insert("message".into(), Value::String(message.to_string()));
        body.insert("severity".into(), Value::String(severity.as_str().to_string()));
        if let Some(finding) = finding {
            body.insert("kind".into(), Value::String(finding.kind.as_str().to_string()));
            body.insert("subject".into(), Value::String(finding.subject.clone()));
        }
        Value::Object(body)
    }

    /// Log and publish a finding; returns whether the publish succeeded
    pub async fn publish_finding(&self, source: &str, finding: &Finding) -> bool {
        log_security_event(finding);
        let body = self.finding_payload(source, finding);
        self.send(finding.severity, body).await
    }

    /// Publish a lifecycle or status notice without a finding
    pub async fn publish_notice(&self, source: &str, severity: Severity, message: &str) -> bool {
        let body = self.payload(source, message, severity, None, &Evidence::new());
        self.send(severity, body).await
    }

    async fn send(&self, severity: Severity, body: Value) -> bool {
        let topic = self.topic_for(severity);
        match self.try_send(&topic, &body).await {
            Ok(()) => {
                self.stats.record_alert_published();
                tracing::debug!(topic = %topic, "Alert published");
                true
            }
            Err(e) => {
                self.stats.record_alert_failed();
                tracing::warn!(topic = %topic, error = %e, "Failed to publish alert");
                false
            }
        }
    }

    async fn try_send(&self, topic: &str, body: &Value) -> Result<()> {
        let payload = serde_json::to_vec(body)?;
        let message = BusMessage::new(topic, payload);

        tokio::time::timeout(self.timeout, self.provider.publish(&message))
            .await
            .map_err(|_| {
                SentinelError::Timeout(format!(
                    "Alert publish timed out after {:?} for topic '{}'",
                    self.timeout, topic
                ))
            })?
    }
}

/// RFC 3339 UTC with millisecond precision and a `Z` suffix
pub fn format_timestamp(millis: u64) -> String {
    let at = i64::try_from(millis)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or_else(Utc::now);
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Emit a finding under the `security` tracing target
pub fn log_security_event(finding: &Finding) {
    let evidence = serde_json::to_string(&finding.evidence).unwrap_or_default();
    match finding.severity {
        Severity::Critical => tracing::error!(
            target: "security",
            event_type = %finding.kind,
            severity = %finding.severity,
            subject = %finding.subject,
            evidence = %evidence,
            "{}",
            finding.message
        ),
        Severity::Warn => tracing::warn!(
            target: "security",
            event_type = %finding.kind,
            severity = %finding.severity,
            subject = %finding.subject,
            evidence = %evidence,
            "{}",
            finding.message
        ),
        Severity::Info => tracing::info!(
            target: "security",
            event_type = %finding.kind,
            severity = %finding.severity,
            subject = %finding.subject,
            evidence = %evidence,
            "{}",
            finding.message
        ),
    }
}
