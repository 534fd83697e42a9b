use clap::Parser;
use std::path::PathBuf;

/// A3S Sentinel - intrusion detection and auto-response for IoT message buses
#[derive(Debug, Parser)]
#[command(name = "a3s-sentinel", version, about)]
pub struct Cli {
    /// Path to a TOML config file (defaults are used when omitted)
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Log firewall actions instead of applying them
    #[arg(long)]
    pub dry_run: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,

    /// Validate the configuration, print it and exit
    #[arg(long)]
    pub check: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        let cli = Cli::parse_from([
            "a3s-sentinel",
            "--config",
            "/etc/sentinel.toml",
            "--dry-run",
            "--log-json",
        ]);
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("/etc/sentinel.toml")));
        assert!(cli.dry_run);
        assert!(cli.log_json);
        assert!(!cli.check);
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["a3s-sentinel"]);
        assert!(cli.config.is_none());
        assert!(!cli.dry_run);
    }
}
