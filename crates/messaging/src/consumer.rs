use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::broker::{BrokerError, Delivery, DeliveryTag, QueueConsumer};

type OffsetKey = (String, i32, i64);

/// Most requeued offsets remembered at once
const MAX_TRACKED_REDELIVERIES: usize = 1024;

/// Requeue counts per offset, kept only until the offset is committed past.
///
/// Entries for deliveries that are never settled are bounded by evicting the
/// lowest offsets first; an evicted delivery reports a count of zero again.
#[derive(Debug)]
struct RedeliveryTracker {
    counts: BTreeMap<OffsetKey, u32>,
    capacity: usize,
}

impl RedeliveryTracker {
    fn new(capacity: usize) -> Self {
        Self {
            counts: BTreeMap::new(),
            capacity: capacity.max(1),
        }
    }

    fn count(&self, key: &OffsetKey) -> u32 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    fn record_requeue(&mut self, key: OffsetKey) {
        *self.counts.entry(key).or_insert(0) += 1;
        while self.counts.len() > self.capacity {
            self.counts.pop_first();
        }
    }

    /// Drop every entry of the partition at or below `key`'s offset
    fn settle(&mut self, key: &OffsetKey) {
        let (queue, partition, offset) = key;
        self.counts
            .retain(|(q, p, o), _| !(q == queue && p == partition && o <= offset));
    }

    fn len(&self) -> usize {
        self.counts.len()
    }
}

/// Manually-committed Kafka consumer of a single queue topic.
///
/// Acking commits past the message. A requeueing nack seeks the partition
/// back so the message is fetched again.
pub struct KafkaQueueConsumer {
    consumer: StreamConsumer,
    redeliveries: Mutex<RedeliveryTracker>,
}

impl KafkaQueueConsumer {
    pub fn new(brokers: &str, group_id: &str, queue: &str) -> Result<Self, BrokerError> {
        info!(
            "Creating Kafka consumer with group_id: {}, queue: {}",
            group_id, queue
        );

        let consumer: StreamConsumer = ClientConfig::new()
            .set("group.id", group_id)
            .set("bootstrap.servers", brokers)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "30000")
            .set("heartbeat.interval.ms", "10000")
            .create()
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        consumer
            .subscribe(&[queue])
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        Ok(Self {
            consumer,
            redeliveries: Mutex::new(RedeliveryTracker::new(MAX_TRACKED_REDELIVERIES)),
        })
    }

    fn key(tag: &DeliveryTag) -> OffsetKey {
        (tag.queue.clone(), tag.partition, tag.offset)
    }

    fn redelivery_count(&self, key: &OffsetKey) -> u32 {
        self.redeliveries
            .lock()
            .map(|r| r.count(key))
            .unwrap_or(0)
    }

    fn forget(&self, tag: &DeliveryTag) {
        if let Ok(mut redeliveries) = self.redeliveries.lock() {
            redeliveries.settle(&Self::key(tag));
            debug!(tracked = redeliveries.len(), "Settled delivery");
        }
    }

    fn commit_past(&self, tag: &DeliveryTag) -> Result<(), BrokerError> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(&tag.queue, tag.partition, Offset::Offset(tag.offset + 1))
            .map_err(|e| BrokerError::Settle(e.to_string()))?;

        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| BrokerError::Settle(e.to_string()))?;

        self.forget(tag);
        Ok(())
    }
}

#[async_trait]
impl QueueConsumer for KafkaQueueConsumer {
    async fn next_delivery(&self) -> Result<Option<Delivery>, BrokerError> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| BrokerError::Consume(e.to_string()))?;

        let tag = DeliveryTag {
            queue: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
        };
        debug!(
            "Received message from topic: {}, partition: {}, offset: {}",
            tag.queue, tag.partition, tag.offset
        );

        let payload = match message.payload() {
            Some(payload) => payload.to_vec(),
            None => {
                warn!("Message has no payload");
                Vec::new()
            }
        };

        let redelivery_count = self.redelivery_count(&Self::key(&tag));
        Ok(Some(Delivery {
            tag,
            payload,
            redelivery_count,
        }))
    }

    async fn ack(&self, tag: &DeliveryTag) -> Result<(), BrokerError> {
        self.commit_past(tag)
    }

    async fn nack(&self, tag: &DeliveryTag, requeue: bool) -> Result<(), BrokerError> {
        if !requeue {
            return self.commit_past(tag);
        }

        if let Ok(mut redeliveries) = self.redeliveries.lock() {
            redeliveries.record_requeue(Self::key(tag));
        }

        self.consumer
            .seek(
                &tag.queue,
                tag.partition,
                Offset::Offset(tag.offset),
                Timeout::After(Duration::from_secs(5)),
            )
            .map_err(|e| BrokerError::Settle(e.to_string()))
    }
}
