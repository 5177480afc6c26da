use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::broker::{destination, BrokerError, MessageBroker, PublishFlags};

const METADATA_TIMEOUT: Duration = Duration::from_secs(5);
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Kafka-backed broker. Queues are topics; the default exchange publishes to
/// the topic named by the routing key.
pub struct KafkaBroker {
    producer: FutureProducer,
    admin: AdminClient<DefaultClientContext>,
    declared: Mutex<HashSet<String>>,
}

impl KafkaBroker {
    /// Create the producer and admin clients without contacting the cluster
    pub fn new(brokers: &str) -> Result<Self, BrokerError> {
        info!("Creating Kafka producer for brokers: {}", brokers);

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", "all") // Wait for all replicas to acknowledge
            .set("retries", "3")
            .create()
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .create()
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        Ok(Self {
            producer,
            admin,
            declared: Mutex::new(HashSet::new()),
        })
    }

    /// Create the clients and verify the cluster answers a metadata request
    pub async fn connect(brokers: &str) -> Result<Self, BrokerError> {
        let broker = Self::new(brokers)?;
        let brokers_seen = broker.fetch_metadata(None).await?;
        info!(brokers = brokers_seen, "Connected to Kafka");
        Ok(broker)
    }

    /// Number of brokers in the metadata for `topic` (or the whole cluster);
    /// zero partitions for a named topic is reported as `Ok(0)`
    async fn fetch_metadata(&self, topic: Option<&str>) -> Result<usize, BrokerError> {
        let producer = self.producer.clone();
        let topic = topic.map(str::to_string);

        tokio::task::spawn_blocking(move || {
            let metadata = producer
                .client()
                .fetch_metadata(topic.as_deref(), METADATA_TIMEOUT)
                .map_err(|e| BrokerError::Connection(e.to_string()))?;

            Ok(match topic {
                Some(name) => metadata
                    .topics()
                    .iter()
                    .find(|t| t.name() == name && t.error().is_none())
                    .map_or(0, |t| t.partitions().len()),
                None => metadata.brokers().len(),
            })
        })
        .await
        .map_err(|e| BrokerError::Connection(format!("metadata task failed: {}", e)))?
    }

    fn is_declared(&self, topic: &str) -> bool {
        self.declared
            .lock()
            .map(|declared| declared.contains(topic))
            .unwrap_or(false)
    }

    fn remember(&self, topic: &str) {
        if let Ok(mut declared) = self.declared.lock() {
            declared.insert(topic.to_string());
        }
    }
}

#[async_trait]
impl MessageBroker for KafkaBroker {
    async fn declare_queue(&self, name: &str) -> Result<(), BrokerError> {
        let topic = NewTopic::new(name, 1, TopicReplication::Fixed(1));
        let results = self
            .admin
            .create_topics(&[topic], &AdminOptions::new())
            .await
            .map_err(|e| BrokerError::Declare {
                queue: name.to_string(),
                reason: e.to_string(),
            })?;

        for result in results {
            match result {
                Ok(created) => info!(topic = %created, "Declared queue"),
                Err((existing, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    debug!(topic = %existing, "Queue already exists")
                }
                Err((failed, code)) => {
                    return Err(BrokerError::Declare {
                        queue: failed,
                        reason: code.to_string(),
                    })
                }
            }
        }

        self.remember(name);
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        flags: PublishFlags,
        body: &[u8],
    ) -> Result<(), BrokerError> {
        let topic = destination(exchange, routing_key);

        if flags.mandatory && !self.is_declared(&topic) {
            if self.fetch_metadata(Some(&topic)).await? == 0 {
                return Err(BrokerError::Unroutable(topic));
            }
            self.remember(&topic);
        }

        let record = FutureRecord::to(&topic).key(routing_key).payload(body);

        match self
            .producer
            .send(record, Timeout::After(SEND_TIMEOUT))
            .await
        {
            Ok((partition, offset)) => {
                debug!(
                    "Message published to topic '{}', partition {}, offset {}",
                    topic, partition, offset
                );
                Ok(())
            }
            Err((err, _)) => {
                warn!("Failed to publish message to {}: {}", topic, err);
                Err(BrokerError::PublishFailed(err.to_string()))
            }
        }
    }
}
