//! Bus provider trait: the transport abstraction
//!
//! The engine only needs to publish alerts and receive every message on the
//! bus. Backends (in-memory, NATS) implement `BusProvider` so the detectors
//! never see transport details.

use crate::error::{Result, SentinelError};
use crate::types::BusMessage;
use async_trait::async_trait;

pub mod memory;
pub mod nats;

/// Core trait for bus backends
#[async_trait]
pub trait BusProvider: Send + Sync {
    /// Publish a message
    async fn publish(&self, message: &BusMessage) -> Result<()>;

    /// Subscribe to an MQTT-style pattern (`+` and `#` wildcards)
    async fn subscribe(&self, pattern: &str) -> Result<Box<dyn Subscription>>;

    /// Provider name (e.g., "nats", "memory")
    fn name(&self) -> &str;

    /// Health check: returns true if the provider is connected and operational
    async fn health(&self) -> Result<bool> {
        Ok(true)
    }

    /// Wait until everything published so far has left the process
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Highest QoS level a message may request
pub const MAX_QOS: u8 = 2;

/// Reject messages no backend can publish
///
/// The topic must be non-empty and wildcard-free, and the QoS at most
/// [`MAX_QOS`].
pub fn check_publishable(message: &BusMessage) -> Result<()> {
    let reason = if message.topic.is_empty() {
        "topic is empty".to_string()
    } else if message.topic.contains('#') || message.topic.contains('+') {
        "wildcards are not allowed in a published topic".to_string()
    } else if message.qos > MAX_QOS {
        format!("QoS {} is out of range 0..={}", message.qos, MAX_QOS)
    } else {
        return Ok(());
    };
    Err(SentinelError::Publish {
        topic: message.topic.clone(),
        reason,
    })
}

/// Async subscription handle for receiving messages
#[async_trait]
pub trait Subscription: Send + Sync {
    /// Receive the next message; `None` once the subscription is closed
    async fn next(&mut self) -> Result<Option<BusMessage>>;
}
