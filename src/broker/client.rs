use crate::broker::{BrokerError, InboundMessage, MessageId};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    pub topic: String,
    pub subscription: String,
    pub receiver_queue_size: usize,
    pub ack_timeout: Duration,
}

impl SubscribeOptions {
    pub fn new(
        topic: &str,
        subscription: &str,
        receiver_queue_size: usize,
        ack_timeout: Duration,
    ) -> Self {
        SubscribeOptions {
            topic: String::from(topic),
            subscription: String::from(subscription),
            receiver_queue_size,
            ack_timeout,
        }
    }
}

#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn subscribe(
        &self,
        options: SubscribeOptions,
    ) -> Result<Arc<dyn Subscription>, BrokerError>;

    async fn close_connection(&self) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait Subscription: Send + Sync {
    fn topic(&self) -> &str;

    fn name(&self) -> &str;

    /// Stops further deliveries. Messages already in the receiver queue are still received.
    fn pause(&self);

    /// Next message from the receiver queue, `None` once the subscription is closed.
    async fn receive(&self) -> Option<InboundMessage>;

    async fn acknowledge(&self, message: &InboundMessage) -> Result<(), BrokerError>;

    /// Fire-and-forget, the message becomes eligible for redelivery.
    fn negative_acknowledge(&self, message: &InboundMessage);

    async fn close(&self) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn send(&self, topic: &str, key: &str, payload: Bytes) -> Result<MessageId, BrokerError>;
}
