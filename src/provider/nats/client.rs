//! NATS core client: connect, publish, subscribe

use super::subscriber::NatsSubscription;
use crate::config::BusConfig;
use crate::error::{Result, SentinelError};
use crate::provider::check_publishable;
use crate::topic::{to_nats_subject, validate_pattern};
use crate::types::BusMessage;
use std::sync::Arc;

/// NATS core pub/sub client
///
/// MQTT-style topics are mapped onto NATS subjects on the way out and
/// back on the way in, so callers only ever see `/`-separated topics.
pub struct NatsClient {
    client: async_nats::Client,
    config: Arc<BusConfig>,
}

impl NatsClient {
    /// Connect to the NATS server named in the config
    pub async fn connect(config: BusConfig) -> Result<Self> {
        let connect_opts = build_connect_options(&config);

        let client = connect_opts
            .connect(&config.url)
            .await
            .map_err(|e| SentinelError::Connection(format!("{}: {}", config.url, e)))?;

        tracing::info!(url = %config.url, client_id = %config.client_id, "Connected to NATS");

        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    /// Publish a message
    ///
    /// NATS core has no broker-side QoS. QoS 0 is fire-and-forget; QoS 1
    /// and 2 wait for the server to acknowledge everything sent so far.
    /// Retained messages are not supported and go out as plain publishes.
    pub async fn publish(&self, message: &BusMessage) -> Result<()> {
        check_publishable(message)?;
        let subject = to_nats_subject(&message.topic).map_err(|e| SentinelError::Publish {
            topic: message.topic.clone(),
            reason: e.to_string(),
        })?;
        if message.retain {
            tracing::debug!(topic = %message.topic, "NATS core cannot retain; publishing plainly");
        }

        self.client
            .publish(subject.clone(), message.payload.clone())
            .await
            .map_err(|e| SentinelError::Publish {
                topic: message.topic.clone(),
                reason: e.to_string(),
            })?;
        if message.qos > 0 {
            self.flush().await.map_err(|e| SentinelError::Publish {
                topic: message.topic.clone(),
                reason: e.to_string(),
            })?;
        }

        tracing::debug!(
            topic = %message.topic,
            subject = %subject,
            qos = message.qos,
            bytes = message.payload.len(),
            "Message published"
        );

        Ok(())
    }

    /// Subscribe to an MQTT-style pattern
    pub async fn subscribe(&self, pattern: &str) -> Result<NatsSubscription> {
        validate_pattern(pattern).map_err(|e| SentinelError::Subscribe {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        let subject = to_nats_subject(pattern).map_err(|e| SentinelError::Subscribe {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        let subscriber = self
            .client
            .subscribe(subject.clone())
            .await
            .map_err(|e| SentinelError::Subscribe {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;

        tracing::info!(pattern = %pattern, subject = %subject, "Subscription created");

        Ok(NatsSubscription::new(subscriber))
    }

    /// Whether the connection is currently up
    pub fn is_connected(&self) -> bool {
        matches!(
            self.client.connection_state(),
            async_nats::connection::State::Connected
        )
    }

    /// Flush buffered publishes to the server
    pub async fn flush(&self) -> Result<()> {
        self.client
            .flush()
            .await
            .map_err(|e| SentinelError::Connection(format!("flush failed: {}", e)))
    }

    /// Get the configuration
    pub fn config(&self) -> &BusConfig {
        &self.config
    }
}

/// Build NATS connect options from config
fn build_connect_options(config: &BusConfig) -> async_nats::ConnectOptions {
    let mut opts = async_nats::ConnectOptions::new()
        .name(config.client_id.clone())
        .connection_timeout(config.connect_timeout());

    if let Some(ref token) = config.token {
        opts = opts.token(token.clone());
    }

    opts
}
