//! Firewall capability
//!
//! The auto-blocker only needs "drop everything from this address" and its
//! inverse. `IptablesFirewall` drives the host packet filter;
//! `DryRunFirewall` logs and records the calls without touching the host.

use crate::error::{Result, SentinelError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tokio::process::Command;

/// Block/unblock by source address
#[async_trait]
pub trait Firewall: Send + Sync {
    /// Drop all traffic from `ip`
    async fn block(&self, ip: &str) -> Result<()>;

    /// Remove the drop rule for `ip`; a missing rule is not an error
    async fn unblock(&self, ip: &str) -> Result<()>;

    fn name(&self) -> &str;
}

/// stderr fragments iptables prints when deleting a rule that isn't there
const MISSING_RULE_MARKERS: [&str; 2] = ["Bad rule", "does a matching rule exist"];

/// Runs `iptables` with a bounded timeout
pub struct IptablesFirewall {
    binary: String,
    chain: String,
    timeout: Duration,
}

impl IptablesFirewall {
    pub fn new(timeout: Duration) -> Self {
        Self {
            binary: "iptables".to_string(),
            chain: "INPUT".to_string(),
            timeout,
        }
    }

    /// Use a different executable (e.g. an absolute path or `ip6tables`)
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Arguments for inserting (`-I`) or deleting (`-D`) the drop rule
    pub fn rule_args<'a>(&'a self, op: &'a str, ip: &'a str) -> [&'a str; 6] {
        [op, self.chain.as_str(), "-s", ip, "-j", "DROP"]
    }

    async fn run(&self, op: &str, ip: &str) -> Result<(bool, String)> {
        let args = self.rule_args(op, ip);
        let output = tokio::time::timeout(self.timeout, async {
            Command::new(&self.binary)
                .args(args)
                .kill_on_drop(true)
                .output()
                .await
        })
        .await
        .map_err(|_| SentinelError::Enforcement {
            ip: ip.to_string(),
            reason: format!("{} {} timed out after {:?}", self.binary, op, self.timeout),
        })?
        .map_err(|e| SentinelError::Enforcement {
            ip: ip.to_string(),
            reason: format!("failed to execute {}: {}", self.binary, e),
        })?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Ok((output.status.success(), stderr))
    }
}

#[async_trait]
impl Firewall for IptablesFirewall {
    async fn block(&self, ip: &str) -> Result<()> {
        let (ok, stderr) = self.run("-I", ip).await?;
        if !ok {
            return Err(SentinelError::Enforcement {
                ip: ip.to_string(),
                reason: stderr,
            });
        }
        tracing::info!(ip = %ip, chain = %self.chain, "Drop rule inserted");
        Ok(())
    }

    async fn unblock(&self, ip: &str) -> Result<()> {
        let (ok, stderr) = self.run("-D", ip).await?;
        if ok {
            tracing::info!(ip = %ip, chain = %self.chain, "Drop rule removed");
            return Ok(());
        }
        if MISSING_RULE_MARKERS.iter().any(|m| stderr.contains(m)) {
            tracing::debug!(ip = %ip, "No drop rule to remove");
            return Ok(());
        }
        Err(SentinelError::Enforcement {
            ip: ip.to_string(),
            reason: stderr,
        })
    }

    fn name(&self) -> &str {
        "iptables"
    }
}

/// A firewall call as seen by [`DryRunFirewall`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "ip", rename_all = "lowercase")]
pub enum FirewallAction {
    Block(String),
    Unblock(String),
}

/// Logs and records actions instead of enforcing them
#[derive(Debug, Default)]
pub struct DryRunFirewall {
    actions: Mutex<Vec<FirewallAction>>,
}

impl DryRunFirewall {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call made so far, in order
    pub fn actions(&self) -> Vec<FirewallAction> {
        match self.actions.lock() {
            Ok(actions) => actions.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn push(&self, action: FirewallAction) {
        match self.actions.lock() {
            Ok(mut actions) => actions.push(action),
            Err(poisoned) => poisoned.into_inner().push(action),
        }
    }
}

#[async_trait]
impl Firewall for DryRunFirewall {
    async fn block(&self, ip: &str) -> Result<()> {
        tracing::info!(ip = %ip, "[dry-run] would insert drop rule");
        self.push(FirewallAction::Block(ip.to_string()));
        Ok(())
    }

    async fn unblock(&self, ip: &str) -> Result<()> {
        tracing::info!(ip = %ip, "[dry-run] would remove drop rule");
        self.push(FirewallAction::Unblock(ip.to_string()));
        Ok(())
    }

    fn name(&self) -> &str {
        "dry-run"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_args() {
        let fw = IptablesFirewall::new(Duration::from_secs(1));
        assert_eq!(
            fw.rule_args("-I", "10.0.0.5"),
            ["-I", "INPUT", "-s", "10.0.0.5", "-j", "DROP"]
        );
        assert_eq!(fw.rule_args("-D", "10.0.0.5")[0], "-D");
    }

    #[tokio::test]
    async fn test_dry_run_records_actions() {
        let fw = DryRunFirewall::new();
        fw.block("10.0.0.5").await.unwrap();
        fw.unblock("10.0.0.5").await.unwrap();
        assert_eq!(
            fw.actions(),
            vec![
                FirewallAction::Block("10.0.0.5".into()),
                FirewallAction::Unblock("10.0.0.5".into()),
            ]
        );
        assert_eq!(fw.name(), "dry-run");
    }

    #[tokio::test]
    async fn test_missing_binary_is_enforcement_error() {
        let fw = IptablesFirewall::new(Duration::from_secs(5))
            .with_binary("/nonexistent/a3s-sentinel-iptables");
        let err = fw.block("10.0.0.5").await.unwrap_err();
        assert!(matches!(err, SentinelError::Enforcement { .. }));
        assert!(!err.is_fatal());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_command_is_enforcement_error() {
        // `false` ignores its arguments and exits 1
        let fw = IptablesFirewall::new(Duration::from_secs(5)).with_binary("false");
        assert!(fw.block("10.0.0.5").await.is_err());
        assert!(fw.unblock("10.0.0.5").await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_command_times_out() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("iptables");
        std::fs::write(&script, "#!/bin/sh\nsleep 5\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let fw = IptablesFirewall::new(Duration::from_millis(100))
            .with_binary(script.to_string_lossy());
        let started = std::time::Instant::now();
        let err = fw.block("10.0.0.5").await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(4));
        match err {
            SentinelError::Enforcement { ip, reason } => {
                assert_eq!(ip, "10.0.0.5");
                assert!(reason.contains("timed out"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_action_serialization() {
        let json = serde_json::to_string(&FirewallAction::Block("1.2.3.4".into())).unwrap();
        assert_eq!(json, r#"{"action":"block","ip":"1.2.3.4"}"#);
    }
}
