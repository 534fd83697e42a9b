//! NATS subscription adapter

use crate::error::Result;
use crate::provider::Subscription;
use crate::topic::from_nats_subject;
use crate::types::BusMessage;
use async_trait::async_trait;
use futures::StreamExt;

/// Subscription over a NATS core subscriber
pub struct NatsSubscription {
    subscriber: async_nats::Subscriber,
}

impl NatsSubscription {
    pub(crate) fn new(subscriber: async_nats::Subscriber) -> Self {
        Self { subscriber }
    }
}

#[async_trait]
impl Subscription for NatsSubscription {
    async fn next(&mut self) -> Result<Option<BusMessage>> {
        Ok(self.subscriber.next().await.map(|msg| {
            BusMessage::new(from_nats_subject(msg.subject.as_str()), msg.payload)
        }))
    }
}
