//! Engine: owns every table and runs the background loops
//!
//! Three loops run once started:
//! - the bus loop feeding every message on `#` to the live detector
//! - the maintenance loop evicting stale detector windows
//! - the log loop polling the tailer and sweeping expired bans
//!
//! Shutdown is cooperative: a watch channel tells every loop to stop after
//! its current unit of work, and `shutdown` waits for them to finish.

use crate::alert::AlertPublisher;
use crate::blocker::AutoBlocker;
use crate::clock::Clock;
use crate::config::SentinelConfig;
use crate::detector::LiveDetector;
use crate::error::Result;
use crate::firewall::Firewall;
use crate::provider::{BusProvider, Subscription};
use crate::rules::LogClassifier;
use crate::stats::{EngineStats, StatsSnapshot};
use crate::tailer::LogTailer;
use crate::types::Severity;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Pattern the live detector subscribes to
pub const CATCH_ALL: &str = "#";

/// Tailer + classifier + blocker
pub struct LogWatcher {
    tailer: Mutex<LogTailer>,
    classifier: LogClassifier,
    blocker: Arc<AutoBlocker>,
    clock: Arc<dyn Clock>,
    stats: Arc<EngineStats>,
}

impl LogWatcher {
    pub fn new(
        tailer: LogTailer,
        blocker: Arc<AutoBlocker>,
        clock: Arc<dyn Clock>,
        stats: Arc<EngineStats>,
    ) -> Self {
        Self {
            tailer: Mutex::new(tailer),
            classifier: LogClassifier::new(),
            blocker,
            clock,
            stats,
        }
    }

    /// Park the cursors at end of file
    pub async fn start(&self) {
        self.tailer.lock().await.start().await;
    }

    /// Read new lines and feed them to the blocker; returns blocks created
    pub async fn poll_once(&self) -> usize {
        let now = self.clock.now_millis();
        let (lines, events) = self
            .tailer
            .lock()
            .await
            .poll_events(&self.classifier, now)
            .await;
        for _ in 0..lines {
            self.stats.record_log_line();
        }

        let mut blocked = 0;
        for event in events {
            if self.blocker.handle_event(event).await.is_some() {
                blocked += 1;
            }
        }
        blocked
    }
}

/// A running sentinel instance
pub struct Engine {
    config: SentinelConfig,
    provider: Arc<dyn BusProvider>,
    stats: Arc<EngineStats>,
    publisher: Arc<AlertPublisher>,
    detector: Arc<LiveDetector>,
    blocker: Arc<AutoBlocker>,
    log_watcher: Arc<LogWatcher>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl Engine {
    /// Validate the config and wire every component
    pub fn new(
        config: SentinelConfig,
        provider: Arc<dyn BusProvider>,
        firewall: Arc<dyn Firewall>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let stats = Arc::new(EngineStats::new());
        let publisher = Arc::new(AlertPublisher::new(
            provider.clone(),
            config.alerts.topic_prefix.clone(),
            config.bus.publish_timeout(),
            clock.clone(),
            stats.clone(),
        ));
        let detector = Arc::new(LiveDetector::new(
            config.detector.clone(),
            config.alerts.detector_source.clone(),
            clock.clone(),
            publisher.clone(),
            stats.clone(),
        )?);
        let blocker = Arc::new(AutoBlocker::new(
            &config.blocker,
            config.alerts.blocker_source.clone(),
            firewall,
            publisher.clone(),
            clock.clone(),
            stats.clone(),
        ));
        let log_watcher = Arc::new(LogWatcher::new(
            LogTailer::new(config.blocker.log_files.clone()),
            blocker.clone(),
            clock,
            stats.clone(),
        ));
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            provider,
            stats,
            publisher,
            detector,
            blocker,
            log_watcher,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }

    /// Subscribe to the bus, park the log cursors and spawn the loops
    ///
    /// A failed subscription is returned to the caller; nothing is spawned.
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let subscription = match self.provider.subscribe(CATCH_ALL).await {
            Ok(sub) => sub,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        self.log_watcher.start().await;

        let mut tasks = self.tasks.lock().await;
        tasks.push(self.spawn_bus_loop(subscription));
        tasks.push(self.spawn_maintenance_loop());
        tasks.push(self.spawn_log_loop());
        drop(tasks);

        tracing::info!(
            provider = self.provider.name(),
            log_files = self.config.blocker.log_files.len(),
            "Sentinel engine started"
        );
        self.publisher
            .publish_notice(
                &self.config.alerts.detector_source,
                Severity::Info,
                "Anomaly Detection Engine started",
            )
            .await;
        Ok(())
    }

    fn spawn_bus_loop(&self, mut subscription: Box<dyn Subscription>) -> JoinHandle<()> {
        let detector = self.detector.clone();
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    next = subscription.next() => match next {
                        Ok(Some(message)) => {
                            detector.on_message(&message);
                        }
                        Ok(None) => {
                            tracing::warn!("Bus subscription closed");
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Error receiving bus message");
                        }
                    },
                }
            }
            tracing::info!("Bus loop stopped");
        })
    }

    fn spawn_maintenance_loop(&self) -> JoinHandle<()> {
        let detector = self.detector.clone();
        let period = self.config.detector.maintenance_interval();
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        detector.maintenance();
                    }
                }
            }
        })
    }

    fn spawn_log_loop(&self) -> JoinHandle<()> {
        let watcher = self.log_watcher.clone();
        let blocker = self.blocker.clone();
        let poll_period = self.config.blocker.poll_interval();
        let expiry_period = self.config.blocker.expiry_interval();
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            // First poll one period after start; `start` already parked the cursors
            let mut poll = interval_at(Instant::now() + poll_period, poll_period);
            poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut expiry = interval_at(Instant::now() + expiry_period, expiry_period);
            expiry.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = poll.tick() => {
                        watcher.poll_once().await;
                    }
                    _ = expiry.tick() => {
                        blocker.sweep_expired().await;
                    }
                }
            }
            tracing::info!("Log loop stopped");
        })
    }

    /// Stop every loop, wait for them and return the final counters
    pub async fn shutdown(&self) -> StatsSnapshot {
        if self.started.swap(false, Ordering::SeqCst) {
            self.publisher
                .publish_notice(
                    &self.config.alerts.detector_source,
                    Severity::Info,
                    "Anomaly Detection Engine shutting down",
                )
                .await;
        }

        self.detector.stop();
        let _ = self.shutdown_tx.send(true);

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Engine task panicked");
            }
        }

        if self.config.blocker.unblock_on_shutdown {
            self.blocker.unblock_all().await;
        }
        if let Err(e) = self.provider.flush().await {
            tracing::warn!(provider = self.provider.name(), error = %e, "Failed to flush bus");
        }

        let snapshot = self.stats.snapshot();
        tracing::info!(
            messages = snapshot.messages_processed,
            findings = snapshot.findings_emitted,
            alerts = snapshot.alerts_published,
            alerts_failed = snapshot.alerts_failed,
            log_lines = snapshot.log_lines_processed,
            blocks = snapshot.blocks,
            unblocks = snapshot.unblocks,
            "Sentinel engine stopped"
        );
        snapshot
    }

    /// Run one log poll now instead of waiting for the loop
    pub async fn poll_logs(&self) -> usize {
        self.log_watcher.poll_once().await
    }

    /// Run one expiry sweep now instead of waiting for the loop
    pub async fn sweep_expired(&self) -> usize {
        self.blocker.sweep_expired().await
    }

    pub fn detector(&self) -> &Arc<LiveDetector> {
        &self.detector
    }

    pub fn blocker(&self) -> &Arc<AutoBlocker> {
        &self.blocker
    }

    pub fn stats(&self) -> &Arc<EngineStats> {
        &self.stats
    }

    pub fn publisher(&self) -> &Arc<AlertPublisher> {
        &self.publisher
    }

    pub fn config(&self) -> &SentinelConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}
