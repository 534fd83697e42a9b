//! Log-driven auto-blocker
//!
//! Per-IP state cycles UNSEEN → TRACKED → BLOCKED → TRACKED. Classified log
//! events accumulate in a bounded per-IP history; once a threshold is
//! crossed inside the evaluation window the IP is handed to the firewall
//! and a [`BlockEntry`] is recorded. Expired entries are lifted by
//! [`AutoBlocker::sweep_expired`], which also forgets unblocked IPs whose
//! newest event has left the evaluation window.
//!
//! The state lock is held across each firewall call so applying a rule and
//! recording it happen as one step.

use crate::alert::AlertPublisher;
use crate::clock::{duration_millis, Clock};
use crate::config::BlockerConfig;
use crate::firewall::Firewall;
use crate::rules::{block_decision, BlockThresholds, ViolationCounts};
use crate::stats::EngineStats;
use crate::types::{BlockEntry, Finding, LogEvent, Severity};
use crate::window::window_start;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A ban together with the time it has left
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveBlock {
    #[serde(flatten)]
    pub entry: BlockEntry,
    pub remaining_secs: u64,
}

#[derive(Default)]
struct BlockerState {
    events: HashMap<String, VecDeque<LogEvent>>,
    blocked: HashMap<String, BlockEntry>,
}

/// Escalates repeated log violations into firewall bans
pub struct AutoBlocker {
    thresholds: BlockThresholds,
    window_ms: u64,
    ttl_secs: u64,
    capacity: usize,
    whitelist: BTreeSet<String>,
    source: String,
    state: Mutex<BlockerState>,
    firewall: Arc<dyn Firewall>,
    publisher: Arc<AlertPublisher>,
    clock: Arc<dyn Clock>,
    stats: Arc<EngineStats>,
}

impl AutoBlocker {
    pub fn new(
        config: &BlockerConfig,
        source: impl Into<String>,
        firewall: Arc<dyn Firewall>,
        publisher: Arc<AlertPublisher>,
        clock: Arc<dyn Clock>,
        stats: Arc<EngineStats>,
    ) -> Self {
        Self {
            thresholds: BlockThresholds {
                auth_failures: config.auth_failure_threshold,
                dos_events: config.dos_threshold,
                unauthorized_events: config.unauthorized_threshold,
            },
            window_ms: duration_millis(config.time_window()),
            ttl_secs: config.block_ttl_secs,
            capacity: config.event_capacity.max(1),
            whitelist: config.whitelist.clone(),
            source: source.into(),
            state: Mutex::new(BlockerState::default()),
            firewall,
            publisher,
            clock,
            stats,
        }
    }

    pub fn is_whitelisted(&self, ip: &str) -> bool {
        self.whitelist.contains(ip)
    }

    /// Record one classified event and block its IP if a threshold trips
    ///
    /// Returns the new entry when this call created a block.
    pub async fn handle_event(&self, event: LogEvent) -> Option<BlockEntry> {
        if self.is_whitelisted(&event.ip) {
            tracing::debug!(ip = %event.ip, "Ignoring whitelisted address");
            return None;
        }

        let now = self.clock.now_millis();
        let ip = event.ip.clone();
        let mut state = self.state.lock().await;

        tracing::debug!(ip = %ip, kind = %event.kind, source = %event.source, "Log event recorded");
        let history = state.events.entry(ip.clone()).or_default();
        if history.len() == self.capacity {
            history.pop_front();
        }
        history.push_back(event);
        self.stats.record_log_event();

        if state.blocked.contains_key(&ip) {
            return None;
        }

        let counts = count_violations(state.events.get(&ip), window_start(now, self.window_ms));
        let decision = block_decision(&counts, &self.thresholds)?;

        if let Err(e) = self.firewall.block(&ip).await {
            self.stats.record_block_failure();
            tracing::error!(ip = %ip, reason = %decision.reason, error = %e, "Failed to block IP");
            return None;
        }

        let entry = BlockEntry {
            ip: ip.clone(),
            reason: decision.reason.clone(),
            created_at: now,
            ttl_secs: self.ttl_secs,
        };
        state.blocked.insert(ip.clone(), entry.clone());
        drop(state);

        self.stats.record_block();
        let finding = Finding::new(
            decision.kind.finding_kind(),
            Severity::Critical,
            ip.as_str(),
            format!("IP {} has been blocked", ip),
        )
        .with_evidence("ip", ip.as_str())
        .with_evidence("reason", decision.reason.as_str())
        .with_evidence("block_duration_seconds", self.ttl_secs)
        .with_evidence("auth_failures", counts.auth_failures)
        .with_evidence("dos_events", counts.dos_events)
        .with_evidence("unauthorized_events", counts.unauthorized_events);
        self.publisher.publish_finding(&self.source, &finding).await;

        Some(entry)
    }

    /// Lift every ban that has lived its TTL and drop idle histories
    ///
    /// An entry whose unblock fails stays in place and is retried on the
    /// next sweep. Returns the number of bans lifted.
    pub async fn sweep_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut state = self.state.lock().await;

        let mut expired: Vec<String> = state
            .blocked
            .values()
            .filter(|entry| entry.is_expired(now))
            .map(|entry| entry.ip.clone())
            .collect();
        expired.sort();

        let mut lifted = 0;
        for ip in expired {
            match self.firewall.unblock(&ip).await {
                Ok(()) => {
                    state.blocked.remove(&ip);
                    self.stats.record_unblock();
                    lifted += 1;
                    tracing::info!(target: "security", ip = %ip, "IP unblocked after TTL");
                }
                Err(e) => {
                    self.stats.record_unblock_failure();
                    tracing::error!(ip = %ip, error = %e, "Failed to unblock IP");
                }
            }
        }

        let cutoff = window_start(now, self.window_ms);
        let BlockerState { events, blocked } = &mut *state;
        let before = events.len();
        events.retain(|ip, history| {
            blocked.contains_key(ip) || history.back().is_some_and(|e| e.timestamp >= cutoff)
        });
        let pruned = before - events.len();
        if pruned > 0 {
            tracing::debug!(pruned, remaining = events.len(), "Forgot idle addresses");
        }
        lifted
    }

    /// Lift every ban regardless of age
    pub async fn unblock_all(&self) -> usize {
        let mut state = self.state.lock().await;
        let mut ips: Vec<String> = state.blocked.keys().cloned().collect();
        ips.sort();

        let mut lifted = 0;
        for ip in ips {
            match self.firewall.unblock(&ip).await {
                Ok(()) => {
                    state.blocked.remove(&ip);
                    self.stats.record_unblock();
                    lifted += 1;
                }
                Err(e) => {
                    self.stats.record_unblock_failure();
                    tracing::error!(ip = %ip, error = %e, "Failed to unblock IP");
                }
            }
        }
        if lifted > 0 {
            tracing::info!(lifted, "Lifted all active blocks");
        }
        lifted
    }

    /// Current bans, oldest first
    pub async fn active_blocks(&self) -> Vec<ActiveBlock> {
        let now = self.clock.now_millis();
        let state = self.state.lock().await;
        let mut blocks: Vec<ActiveBlock> = state
            .blocked
            .values()
            .map(|entry| ActiveBlock {
                remaining_secs: entry.remaining_secs(now),
                entry: entry.clone(),
            })
            .collect();
        blocks.sort_by(|a, b| {
            a.entry
                .created_at
                .cmp(&b.entry.created_at)
                .then_with(|| a.entry.ip.cmp(&b.entry.ip))
        });
        blocks
    }

    pub async fn is_blocked(&self, ip: &str) -> bool {
        self.state.lock().await.blocked.contains_key(ip)
    }

    /// Violations for `ip` inside the evaluation window
    pub async fn violation_counts(&self, ip: &str) -> ViolationCounts {
        let now = self.clock.now_millis();
        let state = self.state.lock().await;
        count_violations(state.events.get(ip), window_start(now, self.window_ms))
    }

    /// Number of IPs with recorded history
    pub async fn tracked_ips(&self) -> usize {
        self.state.lock().await.events.len()
    }
}

fn count_violations(history: Option<&VecDeque<LogEvent>>, cutoff: u64) -> ViolationCounts {
    let mut counts = ViolationCounts::default();
    for event in history.into_iter().flatten() {
        if event.timestamp >= cutoff {
            counts.add(event.kind);
        }
    }
    counts
}
