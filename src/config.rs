//! Engine configuration
//!
//! Loaded from a TOML file. Every field has a default reproducing the
//! reference SafeNest deployment, so an empty file (or no file) yields a
//! working configuration. Call [`SentinelConfig::validate`] before use.

use crate::acl::{default_acl, default_principal_rules, AclPolicy, PrincipalRule};
use crate::error::{Result, SentinelError};
use crate::topic::validate_pattern;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound on every `*_secs` setting (ten years)
pub const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SentinelConfig {
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub blocker: BlockerConfig,
}

/// Which bus backend to connect
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// In-process bus (single-process deployments, tests)
    Memory,
    #[default]
    Nats,
}

/// Bus connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default)]
    pub provider: ProviderKind,

    /// Server URL (NATS only)
    #[serde(default = "default_bus_url")]
    pub url: String,

    /// Auth token (NATS only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Client name announced to the server
    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Upper bound on a single alert publish
    #[serde(default = "default_publish_timeout_secs")]
    pub publish_timeout_secs: u64,
}

/// Alert channel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Alerts go to `<topic_prefix>/<severity>`
    #[serde(default = "default_alert_prefix")]
    pub topic_prefix: String,

    /// `source` field of alerts raised by the live detector
    #[serde(default = "default_detector_source")]
    pub detector_source: String,

    /// `source` field of alerts raised by the auto-blocker
    #[serde(default = "default_blocker_source")]
    pub blocker_source: String,
}

/// Live-stream detector settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// More than this many messages on one topic inside the window is a flood
    #[serde(default = "default_flood_threshold")]
    pub flood_threshold: usize,

    #[serde(default = "default_flood_window_secs")]
    pub flood_window_secs: u64,

    #[serde(default = "default_motion_topic")]
    pub motion_topic: String,

    /// Payload meaning "motion detected"
    #[serde(default = "default_motion_payload")]
    pub motion_payload: String,

    /// More than this many motion events inside the window is a burst
    #[serde(default = "default_motion_burst_threshold")]
    pub motion_burst_threshold: usize,

    #[serde(default = "default_motion_window_secs")]
    pub motion_window_secs: u64,

    /// Timestamps kept per topic / principal
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,

    /// Timestamps kept for motion events
    #[serde(default = "default_motion_capacity")]
    pub motion_capacity: usize,

    /// How long ACL and unknown-topic findings stay suppressed
    #[serde(default = "default_suppression_window_secs")]
    pub suppression_window_secs: u64,

    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,

    #[serde(default = "default_known_topics")]
    pub known_topics: BTreeSet<String>,

    #[serde(default = "default_principal_rules")]
    pub principal_rules: Vec<PrincipalRule>,

    /// principal → allowed topic patterns
    #[serde(default = "default_acl")]
    pub acl: BTreeMap<String, Vec<String>>,
}

/// Log watcher / auto-blocker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockerConfig {
    #[serde(default = "default_auth_failure_threshold")]
    pub auth_failure_threshold: usize,

    #[serde(default = "default_dos_threshold")]
    pub dos_threshold: usize,

    #[serde(default = "default_unauthorized_threshold")]
    pub unauthorized_threshold: usize,

    /// Window the thresholds are evaluated over
    #[serde(default = "default_time_window_secs")]
    pub time_window_secs: u64,

    #[serde(default = "default_block_ttl_secs")]
    pub block_ttl_secs: u64,

    /// Events kept per IP
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_expiry_interval_secs")]
    pub expiry_interval_secs: u64,

    /// Upper bound on one firewall invocation
    #[serde(default = "default_firewall_timeout_secs")]
    pub firewall_timeout_secs: u64,

    /// Log firewall actions instead of running them
    #[serde(default)]
    pub dry_run: bool,

    /// Lift every active ban when the engine stops
    #[serde(default)]
    pub unblock_on_shutdown: bool,

    #[serde(default = "default_log_files")]
    pub log_files: Vec<PathBuf>,

    /// Identifiers that are never counted or blocked
    #[serde(default = "default_whitelist")]
    pub whitelist: BTreeSet<String>,
}

fn default_bus_url() -> String {
    "nats://192.168.1.10:4222".to_string()
}

fn default_client_id() -> String {
    "safenest_detector".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_publish_timeout_secs() -> u64 {
    5
}

fn default_alert_prefix() -> String {
    "safenest/alerts".to_string()
}

fn default_detector_source() -> String {
    "anomaly_detector".to_string()
}

fn default_blocker_source() -> String {
    "log_watcher".to_string()
}

fn default_flood_threshold() -> usize {
    50
}

fn default_flood_window_secs() -> u64 {
    5
}

fn default_motion_topic() -> String {
    "safenest/motion/state".to_string()
}

fn default_motion_payload() -> String {
    "motion_detected".to_string()
}

fn default_motion_burst_threshold() -> usize {
    10
}

fn default_motion_window_secs() -> u64 {
    10
}

fn default_window_capacity() -> usize {
    1000
}

fn default_motion_capacity() -> usize {
    100
}

fn default_suppression_window_secs() -> u64 {
    300
}

fn default_maintenance_interval_secs() -> u64 {
    60
}

fn default_known_topics() -> BTreeSet<String> {
    [
        "safenest/motion/state",
        "safenest/intercom/event",
        "safenest/light1/state",
        "safenest/light1/set",
        "safenest/light2/state",
        "safenest/light2/set",
        "safenest/alerts/info",
        "safenest/alerts/warn",
        "safenest/alerts/critical",
        "safenest/system/command",
        "safenest/system/status",
    ]
    .iter()
    .map(|t| t.to_string())
    .collect()
}

fn default_auth_failure_threshold() -> usize {
    3
}

fn default_dos_threshold() -> usize {
    1
}

fn default_unauthorized_threshold() -> usize {
    5
}

fn default_time_window_secs() -> u64 {
    300
}

fn default_block_ttl_secs() -> u64 {
    3600
}

fn default_event_capacity() -> usize {
    100
}

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_expiry_interval_secs() -> u64 {
    60
}

fn default_firewall_timeout_secs() -> u64 {
    10
}

fn default_log_files() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/var/log/mosquitto/mosquitto.log"),
        PathBuf::from("/var/log/safenest_security.log"),
    ]
}

fn default_whitelist() -> BTreeSet<String> {
    ["127.0.0.1", "192.168.1.10", "192.168.1.20", "::1"]
        .iter()
        .map(|ip| ip.to_string())
        .collect()
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            url: default_bus_url(),
            token: None,
            client_id: default_client_id(),
            connect_timeout_secs: default_connect_timeout_secs(),
            publish_timeout_secs: default_publish_timeout_secs(),
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            topic_prefix: default_alert_prefix(),
            detector_source: default_detector_source(),
            blocker_source: default_blocker_source(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            flood_threshold: default_flood_threshold(),
            flood_window_secs: default_flood_window_secs(),
            motion_topic: default_motion_topic(),
            motion_payload: default_motion_payload(),
            motion_burst_threshold: default_motion_burst_threshold(),
            motion_window_secs: default_motion_window_secs(),
            window_capacity: default_window_capacity(),
            motion_capacity: default_motion_capacity(),
            suppression_window_secs: default_suppression_window_secs(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
            known_topics: default_known_topics(),
            principal_rules: default_principal_rules(),
            acl: default_acl(),
        }
    }
}

impl Default for BlockerConfig {
    fn default() -> Self {
        Self {
            auth_failure_threshold: default_auth_failure_threshold(),
            dos_threshold: default_dos_threshold(),
            unauthorized_threshold: default_unauthorized_threshold(),
            time_window_secs: default_time_window_secs(),
            block_ttl_secs: default_block_ttl_secs(),
            event_capacity: default_event_capacity(),
            poll_interval_secs: default_poll_interval_secs(),
            expiry_interval_secs: default_expiry_interval_secs(),
            firewall_timeout_secs: default_firewall_timeout_secs(),
            dry_run: false,
            unblock_on_shutdown: false,
            log_files: default_log_files(),
            whitelist: default_whitelist(),
        }
    }
}

impl SentinelConfig {
    /// Parse a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Read and parse a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SentinelError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    /// Load from `path` when given, defaults otherwise, then validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let d = &self.detector;
        let b = &self.blocker;

        let durations: [(&str, u64); 11] = [
            ("bus.connect_timeout_secs", self.bus.connect_timeout_secs),
            ("bus.publish_timeout_secs", self.bus.publish_timeout_secs),
            ("detector.flood_window_secs", d.flood_window_secs),
            ("detector.motion_window_secs", d.motion_window_secs),
            ("detector.suppression_window_secs", d.suppression_window_secs),
            ("detector.maintenance_interval_secs", d.maintenance_interval_secs),
            ("blocker.time_window_secs", b.time_window_secs),
            ("blocker.block_ttl_secs", b.block_ttl_secs),
            ("blocker.poll_interval_secs", b.poll_interval_secs),
            ("blocker.expiry_interval_secs", b.expiry_interval_secs),
            ("blocker.firewall_timeout_secs", b.firewall_timeout_secs),
        ];
        for (name, value) in durations {
            if value == 0 {
                return Err(SentinelError::Config(format!("{} must be greater than 0", name)));
            }
            if value > MAX_DURATION_SECS {
                return Err(SentinelError::Config(format!(
                    "{} ({}) exceeds the maximum of {} seconds",
                    name, value, MAX_DURATION_SECS
                )));
            }
        }

        let counts: [(&str, usize); 8] = [
            ("detector.flood_threshold", d.flood_threshold),
            ("detector.motion_burst_threshold", d.motion_burst_threshold),
            ("detector.window_capacity", d.window_capacity),
            ("detector.motion_capacity", d.motion_capacity),
            ("blocker.auth_failure_threshold", b.auth_failure_threshold),
            ("blocker.dos_threshold", b.dos_threshold),
            ("blocker.unauthorized_threshold", b.unauthorized_threshold),
            ("blocker.event_capacity", b.event_capacity),
        ];
        for (name, value) in counts {
            if value == 0 {
                return Err(SentinelError::Config(format!("{} must be greater than 0", name)));
            }
        }

        // The window must be able to hold more events than the threshold
        if d.window_capacity <= d.flood_threshold {
            return Err(SentinelError::Config(format!(
                "detector.window_capacity ({}) must exceed detector.flood_threshold ({})",
                d.window_capacity, d.flood_threshold
            )));
        }
        if d.motion_capacity <= d.motion_burst_threshold {
            return Err(SentinelError::Config(format!(
                "detector.motion_capacity ({}) must exceed detector.motion_burst_threshold ({})",
                d.motion_capacity, d.motion_burst_threshold
            )));
        }
        let max_threshold = b
            .auth_failure_threshold
            .max(b.dos_threshold)
            .max(b.unauthorized_threshold);
        if b.event_capacity < max_threshold {
            return Err(SentinelError::Config(format!(
                "blocker.event_capacity ({}) must be at least the largest threshold ({})",
                b.event_capacity, max_threshold
            )));
        }

        let prefix = self.alerts.topic_prefix.trim_end_matches('/');
        if prefix.is_empty() || prefix.contains('#') || prefix.contains('+') {
            return Err(SentinelError::Config(format!(
                "alerts.topic_prefix is not a plain topic: '{}'",
                self.alerts.topic_prefix
            )));
        }
        if d.motion_topic.is_empty() {
            return Err(SentinelError::Config("detector.motion_topic is empty".to_string()));
        }
        for topic in &d.known_topics {
            validate_pattern(topic).map_err(|e| {
                SentinelError::Config(format!("detector.known_topics: {}", e))
            })?;
        }
        for path in &b.log_files {
            if path.as_os_str().is_empty() {
                return Err(SentinelError::Config(
                    "blocker.log_files contains an empty path".to_string(),
                ));
            }
        }

        self.detector.acl_policy()?;
        Ok(())
    }
}

impl DetectorConfig {
    pub fn flood_window(&self) -> Duration {
        Duration::from_secs(self.flood_window_secs)
    }

    pub fn motion_window(&self) -> Duration {
        Duration::from_secs(self.motion_window_secs)
    }

    pub fn suppression_window(&self) -> Duration {
        Duration::from_secs(self.suppression_window_secs)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    /// Build the ACL policy from the rules and mapping
    pub fn acl_policy(&self) -> Result<AclPolicy> {
        AclPolicy::new(self.principal_rules.clone(), self.acl.clone())
    }
}

impl BlockerConfig {
    pub fn time_window(&self) -> Duration {
        Duration::from_secs(self.time_window_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn expiry_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_interval_secs)
    }

    pub fn firewall_timeout(&self) -> Duration {
        Duration::from_secs(self.firewall_timeout_secs)
    }
}

impl BusConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SentinelConfig::default();
        config.validate().unwrap();
        assert_eq!(config.detector.flood_threshold, 50);
        assert_eq!(config.detector.flood_window_secs, 5);
        assert_eq!(config.detector.motion_burst_threshold, 10);
        assert_eq!(config.blocker.auth_failure_threshold, 3);
        assert_eq!(config.blocker.unauthorized_threshold, 5);
        assert_eq!(config.blocker.block_ttl_secs, 3600);
        assert!(config.blocker.whitelist.contains("127.0.0.1"));
        assert_eq!(config.alerts.topic_prefix, "safenest/alerts");
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = SentinelConfig::from_toml("").unwrap();
        assert_eq!(config.bus.provider, ProviderKind::Nats);
        assert_eq!(config.blocker.log_files.len(), 2);
        assert_eq!(config.detector.known_topics.len(), 11);
    }

    #[test]
    fn test_config_deserialize() {
        let toml_str = r#"
            [bus]
            provider = "memory"

            [detector]
            flood_threshold = 20
            flood_window_secs = 2

            [detector.acl]
            motion_user = ["home/motion/#"]

            [blocker]
            block_ttl_secs = 60
            whitelist = ["10.0.0.1"]
            log_files = ["/tmp/broker.log"]
        "#;
        let config = SentinelConfig::from_toml(toml_str).unwrap();
        config.validate().unwrap();
        assert_eq!(config.bus.provider, ProviderKind::Memory);
        assert_eq!(config.detector.flood_threshold, 20);
        assert_eq!(config.detector.acl.len(), 1);
        assert_eq!(config.blocker.block_ttl_secs, 60);
        assert!(config.blocker.whitelist.contains("10.0.0.1"));
        assert!(!config.blocker.whitelist.contains("127.0.0.1"));
        // Untouched fields keep defaults
        assert_eq!(config.blocker.auth_failure_threshold, 3);
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let mut config = SentinelConfig::default();
        config.blocker.auth_failure_threshold = 0;
        let err = config.validate().unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("auth_failure_threshold"));
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let mut config = SentinelConfig::default();
        config.blocker.block_ttl_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversized_ttl_rejected() {
        let mut config = SentinelConfig::default();
        config.blocker.block_ttl_secs = u64::MAX / 100;
        let err = config.validate().unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("blocker.block_ttl_secs"));

        config.blocker.block_ttl_secs = MAX_DURATION_SECS;
        config.validate().unwrap();
    }

    #[test]
    fn test_oversized_windows_rejected() {
        let mut config = SentinelConfig::default();
        config.detector.flood_window_secs = u64::MAX / 1000;
        assert!(config.validate().is_err());

        let mut config = SentinelConfig::default();
        config.blocker.poll_interval_secs = MAX_DURATION_SECS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_capacity_must_exceed_threshold() {
        let mut config = SentinelConfig::default();
        config.detector.window_capacity = 50;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_acl_pattern_rejected() {
        let mut config = SentinelConfig::default();
        config
            .detector
            .acl
            .insert("panel_user".into(), vec!["safenest/#/set".into()]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wildcard_alert_prefix_rejected() {
        let mut config = SentinelConfig::default();
        config.alerts.topic_prefix = "safenest/#".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = SentinelConfig::from_file("/nonexistent/a3s-sentinel.toml").unwrap_err();
        assert!(matches!(err, SentinelError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sentinel.toml");
        std::fs::write(&path, "[blocker]\ndry_run = true\n").unwrap();

        let config = SentinelConfig::load(Some(&path)).unwrap();
        assert!(config.blocker.dry_run);
    }

    #[test]
    fn test_invalid_toml() {
        let err = SentinelConfig::from_toml("[detector\nflood = ").unwrap_err();
        assert!(matches!(err, SentinelError::TomlDe(_)));
    }
}
