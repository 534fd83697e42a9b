//! Engine counters

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters shared by every part of the engine
#[derive(Debug, Default)]
pub struct EngineStats {
    messages_processed: AtomicU64,
    findings_emitted: AtomicU64,
    alerts_published: AtomicU64,
    alerts_failed: AtomicU64,
    log_lines_processed: AtomicU64,
    log_events: AtomicU64,
    blocks: AtomicU64,
    block_failures: AtomicU64,
    unblocks: AtomicU64,
    unblock_failures: AtomicU64,
}

/// Point-in-time copy of [`EngineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub messages_processed: u64,
    pub findings_emitted: u64,
    pub alerts_published: u64,
    pub alerts_failed: u64,
    pub log_lines_processed: u64,
    pub log_events: u64,
    pub blocks: u64,
    pub block_failures: u64,
    pub unblocks: u64,
    pub unblock_failures: u64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_message(&self) {
        bump(&self.messages_processed);
    }

    pub fn record_findings(&self, n: usize) {
        self.findings_emitted.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn record_alert_published(&self) {
        bump(&self.alerts_published);
    }

    pub fn record_alert_failed(&self) {
        bump(&self.alerts_failed);
    }

    pub fn record_log_line(&self) {
        bump(&self.log_lines_processed);
    }

    pub fn record_log_event(&self) {
        bump(&self.log_events);
    }

    pub fn record_block(&self) {
        bump(&self.blocks);
    }

    pub fn record_block_failure(&self) {
        bump(&self.block_failures);
    }

    pub fn record_unblock(&self) {
        bump(&self.unblocks);
    }

    pub fn record_unblock_failure(&self) {
        bump(&self.unblock_failures);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            findings_emitted: self.findings_emitted.load(Ordering::Relaxed),
            alerts_published: self.alerts_published.load(Ordering::Relaxed),
            alerts_failed: self.alerts_failed.load(Ordering::Relaxed),
            log_lines_processed: self.log_lines_processed.load(Ordering::Relaxed),
            log_events: self.log_events.load(Ordering::Relaxed),
            blocks: self.blocks.load(Ordering::Relaxed),
            block_failures: self.block_failures.load(Ordering::Relaxed),
            unblocks: self.unblocks.load(Ordering::Relaxed),
            unblock_failures: self.unblock_failures.load(Ordering::Relaxed),
        }
    }
}
