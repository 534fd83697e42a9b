use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use a3s_sentinel::cli::Cli;
use a3s_sentinel::clock::SystemClock;
use a3s_sentinel::config::{ProviderKind, SentinelConfig};
use a3s_sentinel::firewall::{DryRunFirewall, Firewall, IptablesFirewall};
use a3s_sentinel::provider::memory::MemoryProvider;
use a3s_sentinel::provider::nats::NatsProvider;
use a3s_sentinel::provider::BusProvider;
use a3s_sentinel::Engine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let mut config = SentinelConfig::load(cli.config.as_deref()).context("invalid configuration")?;
    if cli.dry_run {
        config.blocker.dry_run = true;
    }

    if cli.check {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let provider: Arc<dyn BusProvider> = match config.bus.provider {
        ProviderKind::Memory => Arc::new(MemoryProvider::default()),
        ProviderKind::Nats => Arc::new(
            NatsProvider::connect(config.bus.clone())
                .await
                .context("failed to connect to the message bus")?,
        ),
    };

    let firewall: Arc<dyn Firewall> = if config.blocker.dry_run {
        tracing::warn!("Dry-run mode: firewall rules will be logged, not applied");
        Arc::new(DryRunFirewall::new())
    } else {
        Arc::new(IptablesFirewall::new(config.blocker.firewall_timeout()))
    };

    let engine = Engine::new(config, provider, firewall, Arc::new(SystemClock))?;
    engine.start().await?;

    wait_for_shutdown().await;
    tracing::info!("Shutdown signal received");

    let stats = engine.shutdown().await;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Cannot listen for SIGTERM, waiting for Ctrl-C only");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    tokio::signal::ctrl_c().await.ok();
}
