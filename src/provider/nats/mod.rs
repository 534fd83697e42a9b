//! NATS bus provider
//!
//! Implements `BusProvider` over NATS core pub/sub. The broker bridge
//! republishes device MQTT traffic onto NATS, so topic wildcards translate
//! one-to-one (`+` → `*`, `#` → `>`).

mod client;
mod subscriber;

pub use client::NatsClient;
pub use subscriber::NatsSubscription;

use crate::config::BusConfig;
use crate::error::Result;
use crate::provider::{BusProvider, Subscription};
use crate::types::BusMessage;
use async_trait::async_trait;

/// NATS bus provider
///
/// Wraps `NatsClient` and implements the `BusProvider` trait.
pub struct NatsProvider {
    client: NatsClient,
}

impl NatsProvider {
    /// Connect to NATS
    pub async fn connect(config: BusConfig) -> Result<Self> {
        let client = NatsClient::connect(config).await?;
        Ok(Self { client })
    }

    /// Get the underlying NATS client for advanced usage
    pub fn client(&self) -> &NatsClient {
        &self.client
    }
}

#[async_trait]
impl BusProvider for NatsProvider {
    async fn publish(&self, message: &BusMessage) -> Result<()> {
        self.client.publish(message).await
    }

    async fn subscribe(&self, pattern: &str) -> Result<Box<dyn Subscription>> {
        let sub = self.client.subscribe(pattern).await?;
        Ok(Box::new(sub))
    }

    fn name(&self) -> &str {
        "nats"
    }

    async fn health(&self) -> Result<bool> {
        Ok(self.client.is_connected())
    }

    async fn flush(&self) -> Result<()> {
        self.client.flush().await
    }
}
