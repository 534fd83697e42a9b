//! Engine integration tests
//!
//! Drive a full engine through the in-memory bus, a manual clock, a
//! dry-run firewall and temporary log files. Covers live detection,
//! log-driven blocking, ban expiry, rotation and shutdown.

use a3s_sentinel::config::ProviderKind;
use a3s_sentinel::firewall::FirewallAction;
use a3s_sentinel::{
    BusMessage, BusProvider, DryRunFirewall, Engine, ManualClock, MemoryProvider, SentinelConfig,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    engine: Engine,
    provider: Arc<MemoryProvider>,
    firewall: Arc<DryRunFirewall>,
    clock: Arc<ManualClock>,
    log: PathBuf,
    _dir: tempfile::TempDir,
}

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("mosquitto.log");
    append(&log, "1700000000: historical DOS_ATTACK_DETECTED from 10.9.9.9\n");

    let mut config = SentinelConfig::default();
    config.bus.provider = ProviderKind::Memory;
    config.blocker.log_files = vec![log.clone()];

    let provider = Arc::new(MemoryProvider::default());
    let firewall = Arc::new(DryRunFirewall::new());
    let clock = Arc::new(ManualClock::new(1_704_067_200_000));
    let engine = Engine::new(config, provider.clone(), firewall.clone(), clock.clone()).unwrap();
    engine.start().await.unwrap();

    Fixture {
        engine,
        provider,
        firewall,
        clock,
        log,
        _dir: dir,
    }
}

fn append(path: &Path, text: &str) {
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    f.write_all(text.as_bytes()).unwrap();
}

/// Alert bodies published so far with the given `kind`
fn alerts_of_kind(provider: &MemoryProvider, kind: &str) -> Vec<serde_json::Value> {
    provider
        .history("safenest/alerts/#")
        .iter()
        .filter_map(|m| serde_json::from_slice::<serde_json::Value>(&m.payload).ok())
        .filter(|body| body["kind"] == kind)
        .collect()
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}

/// Let in-flight alert tasks land before asserting exact counts
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

async fn publish_n(provider: &MemoryProvider, topic: &str, payload: &str, n: usize) {
    for _ in 0..n {
        provider.publish(&BusMessage::new(topic, payload.to_string())).await.unwrap();
    }
}

fn block_calls(firewall: &DryRunFirewall) -> Vec<String> {
    firewall
        .actions()
        .into_iter()
        .filter_map(|a| match a {
            FirewallAction::Block(ip) => Some(ip),
            FirewallAction::Unblock(_) => None,
        })
        .collect()
}

fn unblock_calls(firewall: &DryRunFirewall) -> Vec<String> {
    firewall
        .actions()
        .into_iter()
        .filter_map(|a| match a {
            FirewallAction::Unblock(ip) => Some(ip),
            FirewallAction::Block(_) => None,
        })
        .collect()
}

// ─── Live detection ──────────────────────────────────────────────

#[tokio::test]
async fn test_flood_emits_exactly_one_alert_per_window() {
    let f = fixture().await;

    publish_n(&f.provider, "safenest/light1/state", "on", 120).await;
    wait_for(|| alerts_of_kind(&f.provider, "FLOOD").len() == 1).await;
    settle().await;

    let floods = alerts_of_kind(&f.provider, "FLOOD");
    assert_eq!(floods.len(), 1);
    assert_eq!(floods[0]["severity"], "CRITICAL");
    assert_eq!(floods[0]["topic"], "safenest/light1/state");
    assert_eq!(floods[0]["client"], "light1_user");
    assert_eq!(floods[0]["source"], "anomaly_detector");
    assert_eq!(f.provider.history("safenest/alerts/critical").len(), 1);

    f.engine.shutdown().await;
}

#[tokio::test]
async fn test_motion_burst_through_bus() {
    let f = fixture().await;

    publish_n(&f.provider, "safenest/motion/state", "motion_detected", 11).await;
    wait_for(|| alerts_of_kind(&f.provider, "MOTION_ANOMALY").len() == 1).await;
    settle().await;
    assert_eq!(alerts_of_kind(&f.provider, "MOTION_ANOMALY").len(), 1);

    f.engine.shutdown().await;
}

#[tokio::test]
async fn test_nine_motion_events_are_normal() {
    let f = fixture().await;

    publish_n(&f.provider, "safenest/motion/state", "motion_detected", 9).await;
    wait_for(|| f.engine.detector().snapshot().motion_events_in_window == 9).await;
    settle().await;
    assert!(alerts_of_kind(&f.provider, "MOTION_ANOMALY").is_empty());

    f.engine.shutdown().await;
}

#[tokio::test]
async fn test_acl_violation_reported_once_per_topic() {
    let f = fixture().await;

    publish_n(&f.provider, "safenest/light1/set", "on", 5).await;
    publish_n(&f.provider, "safenest/light2/set", "off", 5).await;
    wait_for(|| alerts_of_kind(&f.provider, "UNAUTHORIZED_ACCESS").len() == 2).await;
    settle().await;

    let alerts = alerts_of_kind(&f.provider, "UNAUTHORIZED_ACCESS");
    assert_eq!(alerts.len(), 2);
    let subjects: Vec<&str> = alerts.iter().map(|a| a["subject"].as_str().unwrap()).collect();
    assert!(subjects.contains(&"safenest/light1/set"));
    assert!(subjects.contains(&"safenest/light2/set"));

    // After the suppression window the violation is reported again
    f.clock.advance_secs(301);
    publish_n(&f.provider, "safenest/light1/set", "on", 1).await;
    wait_for(|| alerts_of_kind(&f.provider, "UNAUTHORIZED_ACCESS").len() == 3).await;

    f.engine.shutdown().await;
}

#[tokio::test]
async fn test_unknown_topic_alerted_once() {
    let f = fixture().await;

    publish_n(&f.provider, "safenest/system/debug", "x", 10).await;
    wait_for(|| alerts_of_kind(&f.provider, "UNKNOWN_TOPIC").len() == 1).await;
    settle().await;
    assert_eq!(alerts_of_kind(&f.provider, "UNKNOWN_TOPIC").len(), 1);
    assert!(alerts_of_kind(&f.provider, "UNAUTHORIZED_ACCESS").is_empty());

    f.engine.shutdown().await;
}

#[tokio::test]
async fn test_normal_traffic_raises_nothing() {
    let f = fixture().await;

    publish_n(&f.provider, "safenest/light1/state", "on", 3).await;
    publish_n(&f.provider, "safenest/intercom/event", "ring", 2).await;
    publish_n(&f.provider, "safenest/motion/state", "motion_detected", 2).await;
    wait_for(|| f.engine.stats().snapshot().messages_processed >= 7).await;
    settle().await;

    assert_eq!(f.engine.stats().snapshot().findings_emitted, 0);
    assert!(f.provider.history("safenest/alerts/warn").is_empty());
    assert!(f.provider.history("safenest/alerts/critical").is_empty());

    f.engine.shutdown().await;
}

// ─── Log-driven blocking ─────────────────────────────────────────

#[tokio::test]
async fn test_dos_log_line_blocks_once() {
    let f = fixture().await;

    // History present before start is never replayed
    assert_eq!(f.engine.poll_logs().await, 0);

    append(&f.log, "2024-01-01 DOS_ATTACK_DETECTED from 10.0.0.5\n");
    assert_eq!(f.engine.poll_logs().await, 1);
    assert_eq!(block_calls(&f.firewall), vec!["10.0.0.5".to_string()]);

    let alerts = alerts_of_kind(&f.provider, "DOS_ATTACK");
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["ip"], "10.0.0.5");
    assert_eq!(alerts[0]["source"], "log_watcher");
    assert_eq!(alerts[0]["block_duration_seconds"], 3600);

    // Further qualifying lines for a blocked IP do nothing
    append(&f.log, "DOS_ATTACK_DETECTED from 10.0.0.5\nrate limit exceeded 10.0.0.5\n");
    assert_eq!(f.engine.poll_logs().await, 0);
    assert_eq!(block_calls(&f.firewall).len(), 1);

    f.engine.shutdown().await;
}

#[tokio::test]
async fn test_third_auth_failure_triggers_block() {
    let f = fixture().await;

    append(&f.log, "Client from 10.0.0.9: authentication failed\n");
    append(&f.log, "Client from 10.0.0.9: bad username or password\n");
    f.engine.poll_logs().await;
    assert!(block_calls(&f.firewall).is_empty());

    append(&f.log, "Socket error on 10.0.0.9: not authorized\n");
    f.engine.poll_logs().await;
    assert_eq!(block_calls(&f.firewall), vec!["10.0.0.9".to_string()]);

    let active = f.engine.blocker().active_blocks().await;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].entry.reason, "3 authentication failures");

    f.engine.shutdown().await;
}

#[tokio::test]
async fn test_whitelisted_ip_never_blocked() {
    let f = fixture().await;

    for _ in 0..5 {
        append(&f.log, "DOS_ATTACK_DETECTED from 127.0.0.1\n");
        append(&f.log, "authentication failed 192.168.1.10\n");
    }
    f.engine.poll_logs().await;
    assert!(f.firewall.actions().is_empty());
    assert_eq!(f.engine.stats().snapshot().log_lines_processed, 10);

    f.engine.shutdown().await;
}

#[tokio::test]
async fn test_lines_without_valid_ip_are_skipped() {
    let f = fixture().await;

    append(&f.log, "DOS_ATTACK_DETECTED from 300.1.1.1\nauthentication failed, no address\n");
    f.engine.poll_logs().await;
    assert!(f.firewall.actions().is_empty());
    assert_eq!(f.engine.stats().snapshot().log_events, 0);

    f.engine.shutdown().await;
}

#[tokio::test]
async fn test_ban_expires_after_ttl() {
    let f = fixture().await;

    append(&f.log, "DOS_ATTACK_DETECTED from 10.0.0.5\n");
    f.engine.poll_logs().await;

    f.clock.advance_secs(1800);
    assert_eq!(f.engine.sweep_expired().await, 0);
    assert!(unblock_calls(&f.firewall).is_empty());

    f.clock.advance_secs(1800);
    assert_eq!(f.engine.sweep_expired().await, 1);
    assert_eq!(unblock_calls(&f.firewall), vec!["10.0.0.5".to_string()]);
    assert!(f.engine.blocker().active_blocks().await.is_empty());

    // Back to TRACKED: a new DoS line blocks again
    append(&f.log, "DOS_ATTACK_DETECTED from 10.0.0.5\n");
    f.engine.poll_logs().await;
    assert_eq!(block_calls(&f.firewall).len(), 2);

    f.engine.shutdown().await;
}

#[tokio::test]
async fn test_truncated_log_is_reread() {
    let f = fixture().await;

    std::fs::write(&f.log, "DOS_ATTACK_DETECTED 10.0.0.77\n").unwrap();
    f.engine.poll_logs().await;
    assert_eq!(block_calls(&f.firewall), vec!["10.0.0.77".to_string()]);

    f.engine.shutdown().await;
}

// ─── Lifecycle ───────────────────────────────────────────────────

#[tokio::test]
async fn test_shutdown_stops_detection() {
    let f = fixture().await;

    let stats = f.engine.shutdown().await;
    assert_eq!(stats.blocks, 0);
    assert!(!f.engine.detector().is_running());

    publish_n(&f.provider, "evil/topic", "x", 3).await;
    settle().await;
    assert!(alerts_of_kind(&f.provider, "UNKNOWN_TOPIC").is_empty());
}
