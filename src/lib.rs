//! # a3s-sentinel
//!
//! Intrusion detection and auto-response for small IoT message buses.
//!
//! ## Overview
//!
//! `a3s-sentinel` watches two inputs and reacts to abnormal patterns:
//!
//! - the **live bus stream**, where every message is classified for
//!   flooding, ACL violations, motion-sensor bursts and unknown topics
//! - **host log files**, tailed incrementally; repeated authentication
//!   failures, DoS markers and unauthorized access escalate into
//!   time-limited firewall bans
//!
//! Both publish alerts to `<prefix>/<severity>` on the same bus.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use a3s_sentinel::{Engine, SentinelConfig, SystemClock};
//! use a3s_sentinel::firewall::DryRunFirewall;
//! use a3s_sentinel::provider::memory::MemoryProvider;
//! use std::sync::Arc;
//!
//! # async fn example() -> a3s_sentinel::Result<()> {
//! let engine = Engine::new(
//!     SentinelConfig::default(),
//!     Arc::new(MemoryProvider::default()),
//!     Arc::new(DryRunFirewall::new()),
//!     Arc::new(SystemClock),
//! )?;
//!
//! engine.start().await?;
//! // ... run until a shutdown signal arrives
//! let stats = engine.shutdown().await;
//! println!("{} messages processed", stats.messages_processed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **SlidingWindowCounter**: bounded per-key timestamp windows
//! - **rules**: pure classifier functions producing `Finding`s
//! - **LiveDetector**: per-message classification with suppression
//! - **LogTailer**: incremental, rotation-aware file reading
//! - **AutoBlocker**: per-IP violation tracking and ban lifecycle
//! - **BusProvider** / **Firewall**: injectable transport and enforcement

pub mod acl;
pub mod alert;
pub mod blocker;
pub mod cli;
pub mod clock;
pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod firewall;
pub mod provider;
pub mod rules;
pub mod stats;
pub mod tailer;
pub mod topic;
pub mod types;
pub mod window;

// Re-export core types
pub use acl::{AclPolicy, PrincipalRule};
pub use alert::AlertPublisher;
pub use blocker::{ActiveBlock, AutoBlocker};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SentinelConfig;
pub use detector::{DetectorSnapshot, LiveDetector};
pub use engine::Engine;
pub use error::{Result, SentinelError};
pub use firewall::{DryRunFirewall, Firewall, IptablesFirewall};
pub use provider::{BusProvider, Subscription};
pub use stats::{EngineStats, StatsSnapshot};
pub use tailer::{FileCursor, LogTailer};
pub use types::{BlockEntry, BusMessage, Finding, FindingKind, LogEvent, LogEventKind, Severity};
pub use window::SlidingWindowCounter;

// Re-export providers for convenience
pub use provider::memory::{MemoryConfig, MemoryProvider};
pub use provider::nats::{NatsClient, NatsProvider, NatsSubscription};
