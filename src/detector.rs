//! Live stream anomaly detector
//!
//! Every bus message is recorded against per-topic and per-principal
//! windows and run through the classifier rules in a fixed order: flood,
//! ACL, motion burst, unknown topic. All windowed state sits behind one
//! mutex; classification is synchronous and alert publication happens
//! afterwards on a spawned task so slow publishes never stall ingestion.

use crate::acl::AclPolicy;
use crate::alert::AlertPublisher;
use crate::clock::{duration_millis, Clock};
use crate::config::DetectorConfig;
use crate::error::Result;
use crate::rules;
use crate::stats::EngineStats;
use crate::types::{BusMessage, Finding};
use crate::window::{window_start, SlidingWindowCounter};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Mutable detector state
struct DetectorState {
    topics: SlidingWindowCounter<String>,
    principals: SlidingWindowCounter<String>,
    motion: SlidingWindowCounter<String>,
    /// topic → time flood findings are suppressed until
    flood_until: HashMap<String, u64>,
    /// topic → time it was flagged (flood or unknown)
    flagged: HashMap<String, u64>,
    /// (principal, topic) → time the ACL finding was raised
    acl_reported: HashMap<(String, String), u64>,
    /// Motion findings are suppressed until this time
    motion_until: u64,
}

/// Read-only view of the detector's windows
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorSnapshot {
    pub tracked_topics: usize,
    pub tracked_principals: usize,
    /// Messages per principal inside the flood window
    pub principal_rates: BTreeMap<String, usize>,
    pub motion_events_in_window: usize,
    pub flagged_topics: Vec<String>,
}

/// Classifies bus messages as they arrive
pub struct LiveDetector {
    config: DetectorConfig,
    acl: AclPolicy,
    alert_prefix: String,
    source: String,
    state: Mutex<DetectorState>,
    clock: Arc<dyn Clock>,
    publisher: Arc<AlertPublisher>,
    stats: Arc<EngineStats>,
    running: AtomicBool,
}

impl LiveDetector {
    pub fn new(
        config: DetectorConfig,
        source: impl Into<String>,
        clock: Arc<dyn Clock>,
        publisher: Arc<AlertPublisher>,
        stats: Arc<EngineStats>,
    ) -> Result<Self> {
        let acl = config.acl_policy()?;
        let state = DetectorState {
            topics: SlidingWindowCounter::new(config.window_capacity),
            principals: SlidingWindowCounter::new(config.window_capacity),
            motion: SlidingWindowCounter::new(config.motion_capacity),
            flood_until: HashMap::new(),
            flagged: HashMap::new(),
            acl_reported: HashMap::new(),
            motion_until: 0,
        };

        Ok(Self {
            alert_prefix: publisher.prefix().to_string(),
            config,
            acl,
            source: source.into(),
            state: Mutex::new(state),
            clock,
            publisher,
            stats,
            running: AtomicBool::new(true),
        })
    }

    fn lock(&self) -> MutexGuard<'_, DetectorState> {
        // A panic mid-update leaves the windows usable; keep going
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop accepting messages; in-flight publishes still complete
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Thread-safe ingestion entry point
    ///
    /// Classifies the message and hands any findings to the alert publisher
    /// on a background task. Returns the number of findings raised. Must be
    /// called from within a tokio runtime.
    pub fn on_message(&self, message: &BusMessage) -> usize {
        if !self.is_running() {
            return 0;
        }

        let findings = self.ingest(&message.topic, &message.payload_str());
        let raised = findings.len();
        if raised > 0 {
            let publisher = self.publisher.clone();
            let source = self.source.clone();
            tokio::spawn(async move {
                for finding in &findings {
                    publisher.publish_finding(&source, finding).await;
                }
            });
        }
        raised
    }

    /// Record a message and return the findings it raises
    pub fn ingest(&self, topic: &str, payload: &str) -> Vec<Finding> {
        let now = self.clock.now_millis();
        let principal = self.acl.infer_principal(topic).to_string();
        let flood_ms = duration_millis(self.config.flood_window());
        let suppression_ms = duration_millis(self.config.suppression_window());

        let mut findings = Vec::new();
        let mut state = self.lock();

        let topic_key = topic.to_string();
        state.topics.record(&topic_key, now);
        state.principals.record(&principal, now);

        // Flood
        let count = state.topics.count_since(&topic_key, window_start(now, flood_ms));
        let flood_suppressed = state.flood_until.get(topic).is_some_and(|until| now < *until);
        if !flood_suppressed {
            if let Some(finding) = rules::flood_finding(
                topic,
                &principal,
                count,
                self.config.flood_threshold,
                self.config.flood_window_secs,
            ) {
                state.flood_until.insert(topic_key.clone(), now.saturating_add(flood_ms));
                state.flagged.insert(topic_key.clone(), now);
                findings.push(finding);
            }
        }

        // ACL
        if let Some(finding) = rules::acl_finding(&self.acl, &principal, topic, payload) {
            let key = (principal.clone(), topic_key.clone());
            let reported = state
                .acl_reported
                .get(&key)
                .is_some_and(|at| now.saturating_sub(*at) < suppression_ms);
            if !reported {
                state.acl_reported.insert(key, now);
                findings.push(finding);
            }
        }

        // Motion burst
        if topic == self.config.motion_topic && payload.trim() == self.config.motion_payload {
            let motion_ms = duration_millis(self.config.motion_window());
            state.motion.record(&topic_key, now);
            let count = state.motion.count_since(&topic_key, window_start(now, motion_ms));
            if now >= state.motion_until {
                if let Some(finding) = rules::motion_finding(
                    topic,
                    count,
                    self.config.motion_burst_threshold,
                    self.config.motion_window_secs,
                ) {
                    state.motion_until = now.saturating_add(motion_ms);
                    findings.push(finding);
                }
            }
        }

        // Unknown topic
        let flagged = state
            .flagged
            .get(topic)
            .is_some_and(|at| now.saturating_sub(*at) < suppression_ms);
        if !flagged {
            if let Some(finding) =
                rules::unknown_topic_finding(topic, &self.config.known_topics, &self.alert_prefix)
            {
                state.flagged.insert(topic_key, now);
                findings.push(finding);
            }
        }

        drop(state);
        self.stats.record_message();
        self.stats.record_findings(findings.len());
        findings
    }

    /// Evict stale windows and expired suppression flags
    ///
    /// Returns the number of window keys removed.
    pub fn maintenance(&self) -> usize {
        let now = self.clock.now_millis();
        let longest = self.config.flood_window().max(self.config.motion_window());
        let cutoff = now.saturating_sub(duration_millis(longest).saturating_mul(2));
        let suppression_ms = duration_millis(self.config.suppression_window());

        let mut state = self.lock();
        let evicted = state.topics.evict_older_than(cutoff)
            + state.principals.evict_older_than(cutoff)
            + state.motion.evict_older_than(cutoff);

        state.flood_until.retain(|_, until| *until > now);
        state
            .flagged
            .retain(|_, at| now.saturating_sub(*at) < suppression_ms);
        state
            .acl_reported
            .retain(|_, at| now.saturating_sub(*at) < suppression_ms);

        if evicted > 0 {
            tracing::debug!(
                evicted,
                remaining_topics = state.topics.len(),
                "Detector maintenance evicted stale windows"
            );
        }
        evicted
    }

    pub fn snapshot(&self) -> DetectorSnapshot {
        let now = self.clock.now_millis();
        let flood_start = window_start(now, duration_millis(self.config.flood_window()));
        let motion_start = window_start(now, duration_millis(self.config.motion_window()));
        let state = self.lock();

        let principals: BTreeSet<&str> = self
            .config
            .principal_rules
            .iter()
            .map(|r| r.principal.as_str())
            .chain(std::iter::once(crate::acl::UNKNOWN_PRINCIPAL))
            .collect();
        let principal_rates = principals
            .into_iter()
            .filter(|p| state.principals.contains(&p.to_string()))
            .map(|p| (p.to_string(), state.principals.count_since(&p.to_string(), flood_start)))
            .collect();

        let mut flagged_topics: Vec<String> = state.flagged.keys().cloned().collect();
        flagged_topics.sort();

        DetectorSnapshot {
            tracked_topics: state.topics.len(),
            tracked_principals: state.principals.len(),
            principal_rates,
            motion_events_in_window: state
                .motion
                .count_since(&self.config.motion_topic, motion_start),
            flagged_topics,
        }
    }
}
