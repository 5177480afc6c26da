pub mod broker;
pub mod consumer;
pub mod memory;
pub mod producer;

pub use broker::{
    destination, BrokerError, Delivery, DeliveryTag, MessageBroker, PublishFlags, QueueConsumer,
};
pub use consumer::KafkaQueueConsumer;
pub use memory::{InMemoryBroker, InMemoryConsumer};
pub use producer::KafkaBroker;
