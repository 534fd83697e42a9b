//! In-memory bus provider for tests and single-process deployments
//!
//! Messages fan out over a tokio broadcast channel; each subscription
//! filters by its own MQTT pattern. Retained messages are kept per topic
//! and replayed to new matching subscriptions, and an empty retained
//! payload clears the topic. A bounded history of published messages is
//! kept for inspection.

use crate::error::{Result, SentinelError};
use crate::provider::{check_publishable, BusProvider, Subscription};
use crate::topic::{topic_matches, validate_pattern};
use crate::types::BusMessage;
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Configuration for the in-memory provider
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Messages buffered per subscriber before it starts lagging
    pub channel_capacity: usize,
    /// Published messages retained for [`MemoryProvider::history`]
    pub max_history: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 10_000,
            max_history: 10_000,
        }
    }
}

/// In-memory bus provider
#[derive(Clone)]
pub struct MemoryProvider {
    sender: broadcast::Sender<BusMessage>,
    history: Arc<Mutex<VecDeque<BusMessage>>>,
    retained: Arc<Mutex<BTreeMap<String, BusMessage>>>,
    max_history: usize,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

impl MemoryProvider {
    pub fn new(config: MemoryConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            sender,
            history: Arc::new(Mutex::new(VecDeque::new())),
            retained: Arc::new(Mutex::new(BTreeMap::new())),
            max_history: config.max_history,
        }
    }

    /// Published messages matching `pattern`, oldest first
    pub fn history(&self, pattern: &str) -> Vec<BusMessage> {
        let history = match self.history.lock() {
            Ok(history) => history,
            Err(poisoned) => poisoned.into_inner(),
        };
        history
            .iter()
            .filter(|m| topic_matches(pattern, &m.topic))
            .cloned()
            .collect()
    }

    /// Retained messages matching `pattern`, ordered by topic
    pub fn retained(&self, pattern: &str) -> Vec<BusMessage> {
        let retained = match self.retained.lock() {
            Ok(retained) => retained,
            Err(poisoned) => poisoned.into_inner(),
        };
        retained
            .values()
            .filter(|m| topic_matches(pattern, &m.topic))
            .cloned()
            .collect()
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl BusProvider for MemoryProvider {
    async fn publish(&self, message: &BusMessage) -> Result<()> {
        check_publishable(message)?;

        if message.retain {
            let mut retained = match self.retained.lock() {
                Ok(retained) => retained,
                Err(poisoned) => poisoned.into_inner(),
            };
            if message.payload.is_empty() {
                retained.remove(&message.topic);
            } else {
                retained.insert(message.topic.clone(), message.clone());
            }
        }

        {
            let mut history = match self.history.lock() {
                Ok(history) => history,
                Err(poisoned) => poisoned.into_inner(),
            };
            if self.max_history > 0 {
                if history.len() >= self.max_history {
                    history.pop_front();
                }
                history.push_back(message.clone());
            }
        }

        // No receivers is fine; the message just goes nowhere
        let _ = self.sender.send(message.clone());

        tracing::debug!(
            topic = %message.topic,
            bytes = message.payload.len(),
            qos = message.qos,
            retain = message.retain,
            "Message published"
        );
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<Box<dyn Subscription>> {
        validate_pattern(pattern).map_err(|e| SentinelError::Subscribe {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        // Take the receiver first so nothing published meanwhile is missed
        let receiver = self.sender.subscribe();
        let pending = self.retained(pattern).into_iter().collect();
        Ok(Box::new(MemorySubscription {
            receiver,
            pending,
            pattern: pattern.to_string(),
        }))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Subscription over the in-memory broadcast channel
pub struct MemorySubscription {
    receiver: broadcast::Receiver<BusMessage>,
    /// Retained messages not yet handed out
    pending: VecDeque<BusMessage>,
    pattern: String,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Result<Option<BusMessage>> {
        if let Some(message) = self.pending.pop_front() {
            return Ok(Some(message));
        }
        loop {
            match self.receiver.recv().await {
                Ok(message) => {
                    if topic_matches(&self.pattern, &message.topic) {
                        return Ok(Some(message));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        pattern = %self.pattern,
                        skipped,
                        "Subscriber lagged, messages dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_subscribe() {
        let provider = MemoryProvider::default();
        let mut sub = provider.subscribe("safenest/#").await.unwrap();

        provider
            .publish(&BusMessage::new("safenest/light1/state", "on"))
            .await
            .unwrap();

        let msg = sub.next().await.unwrap().unwrap();
        assert_eq!(msg.topic, "safenest/light1/state");
        assert_eq!(msg.payload_str(), "on");
    }

    #[tokio::test]
    async fn test_subscription_filters_by_pattern() {
        let provider = MemoryProvider::default();
        let mut sub = provider.subscribe("safenest/alerts/+").await.unwrap();

        provider.publish(&BusMessage::new("safenest/motion/state", "x")).await.unwrap();
        provider.publish(&BusMessage::new("safenest/alerts/warn", "y")).await.unwrap();

        let msg = sub.next().await.unwrap().unwrap();
        assert_eq!(msg.topic, "safenest/alerts/warn");
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let provider = MemoryProvider::new(MemoryConfig {
            channel_capacity: 16,
            max_history: 3,
        });
        for i in 0..5 {
            provider
                .publish(&BusMessage::new(format!("t/{}", i), "x"))
                .await
                .unwrap();
        }
        let history = provider.history("#");
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].topic, "t/2");
    }

    #[tokio::test]
    async fn test_wildcard_publish_rejected() {
        let provider = MemoryProvider::default();
        assert!(provider.publish(&BusMessage::new("t/#", "x")).await.is_err());
    }

    #[tokio::test]
    async fn test_out_of_range_qos_rejected() {
        let provider = MemoryProvider::default();
        let msg = BusMessage::new("safenest/light1/state", "on").with_qos(3);
        assert!(provider.publish(&msg).await.is_err());
        assert!(provider.history("#").is_empty());
    }

    #[tokio::test]
    async fn test_retained_message_replayed_to_new_subscriber() {
        let provider = MemoryProvider::default();
        provider
            .publish(&BusMessage::new("safenest/light1/state", "on").with_retain(true))
            .await
            .unwrap();
        provider
            .publish(&BusMessage::new("safenest/light2/state", "off"))
            .await
            .unwrap();

        let mut sub = provider.subscribe("safenest/+/state").await.unwrap();
        let msg = sub.next().await.unwrap().unwrap();
        assert_eq!(msg.topic, "safenest/light1/state");
        assert!(msg.retain);

        // Live traffic follows the replay
        provider
            .publish(&BusMessage::new("safenest/light2/state", "on"))
            .await
            .unwrap();
        let msg = sub.next().await.unwrap().unwrap();
        assert_eq!(msg.topic, "safenest/light2/state");
    }

    #[tokio::test]
    async fn test_empty_retained_payload_clears_topic() {
        let provider = MemoryProvider::default();
        let topic = "safenest/light1/state";
        provider
            .publish(&BusMessage::new(topic, "on").with_retain(true))
            .await
            .unwrap();
        assert_eq!(provider.retained("#").len(), 1);

        provider
            .publish(&BusMessage::new(topic, "").with_retain(true))
            .await
            .unwrap();
        assert!(provider.retained("#").is_empty());
    }

    #[tokio::test]
    async fn test_invalid_subscribe_pattern() {
        let provider = MemoryProvider::default();
        assert!(provider.subscribe("t/#/x").await.is_err());
    }

    #[tokio::test]
    async fn test_health_and_name() {
        let provider = MemoryProvider::default();
        assert_eq!(provider.name(), "memory");
        assert!(provider.health().await.unwrap());
        let _sub = provider.subscribe("#").await.unwrap();
        assert_eq!(provider.subscriber_count(), 1);
    }
}
