use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Broker connection error: {0}")]
    Connection(String),

    #[error("Failed to declare queue {queue}: {reason}")]
    Declare { queue: String, reason: String },

    #[error("No queue bound for mandatory publish to {0}")]
    Unroutable(String),

    #[error("Failed to publish message: {0}")]
    PublishFailed(String),

    #[error("Failed to receive delivery: {0}")]
    Consume(String),

    #[error("Failed to settle delivery: {0}")]
    Settle(String),
}

/// Per-publish options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishFlags {
    /// Fail instead of silently dropping when no queue receives the message
    pub mandatory: bool,
}

impl PublishFlags {
    pub fn mandatory() -> Self {
        Self { mandatory: true }
    }
}

/// Queue a message is routed to. The default (empty) exchange routes
/// straight to the queue named by the routing key.
pub fn destination(exchange: &str, routing_key: &str) -> String {
    if exchange.is_empty() {
        routing_key.to_string()
    } else {
        format!("{}.{}", exchange, routing_key)
    }
}

/// Publishing side of the message broker
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Make sure a durable queue exists; declaring an existing queue succeeds
    async fn declare_queue(&self, name: &str) -> Result<(), BrokerError>;

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        flags: PublishFlags,
        body: &[u8],
    ) -> Result<(), BrokerError>;
}

/// Identifies one delivery so it can be settled
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryTag {
    pub queue: String,
    pub partition: i32,
    pub offset: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub payload: Vec<u8>,
    /// How many times this message was handed back with a requeueing nack
    pub redelivery_count: u32,
}

/// Consuming side of one queue.
///
/// Every delivery must be settled exactly once with `ack` or `nack`.
#[async_trait]
pub trait QueueConsumer: Send + Sync {
    /// Wait for the next delivery; `None` once the consumer is closed
    async fn next_delivery(&self) -> Result<Option<Delivery>, BrokerError>;

    async fn ack(&self, tag: &DeliveryTag) -> Result<(), BrokerError>;

    /// Reject a delivery, either redelivering it later or discarding it
    async fn nack(&self, tag: &DeliveryTag, requeue: bool) -> Result<(), BrokerError>;
}
