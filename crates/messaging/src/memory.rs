//! In-memory broker with queue semantics, used by tests and local runs.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::debug;

use crate::broker::{
    destination, BrokerError, Delivery, DeliveryTag, MessageBroker, PublishFlags, QueueConsumer,
};

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Delivery>,
    unacked: HashMap<DeliveryTag, Delivery>,
    next_offset: i64,
}

#[derive(Default)]
struct Shared {
    queues: Mutex<HashMap<String, QueueState>>,
    notify: Notify,
    closed: AtomicBool,
    acks: AtomicUsize,
    requeues: AtomicUsize,
    discards: AtomicUsize,
    failing_publishes: AtomicU32,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, QueueState>>, BrokerError> {
        self.queues
            .lock()
            .map_err(|_| BrokerError::Connection("queue map poisoned".to_string()))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumer of `queue`; the queue must have been declared
    pub fn consumer(&self, queue: &str) -> InMemoryConsumer {
        InMemoryConsumer {
            shared: Arc::clone(&self.shared),
            queue: queue.to_string(),
        }
    }

    /// Stop all consumers once their queues are drained
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.notify.notify_waiters();
    }

    /// Make the next `n` publishes fail
    pub fn fail_next_publishes(&self, n: u32) {
        self.shared.failing_publishes.store(n, Ordering::SeqCst);
    }

    pub fn ack_count(&self) -> usize {
        self.shared.acks.load(Ordering::SeqCst)
    }

    pub fn requeue_count(&self) -> usize {
        self.shared.requeues.load(Ordering::SeqCst)
    }

    pub fn discard_count(&self) -> usize {
        self.shared.discards.load(Ordering::SeqCst)
    }

    /// Payloads waiting in `queue`, oldest first
    pub fn ready_messages(&self, queue: &str) -> Vec<Vec<u8>> {
        self.shared
            .queues
            .lock()
            .ok()
            .and_then(|queues| {
                queues
                    .get(queue)
                    .map(|q| q.ready.iter().map(|d| d.payload.clone()).collect())
            })
            .unwrap_or_default()
    }

    /// Deliveries handed out but not yet settled
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.shared
            .queues
            .lock()
            .ok()
            .and_then(|queues| queues.get(queue).map(|q| q.unacked.len()))
            .unwrap_or(0)
    }

    /// Whether every declared queue is empty and fully settled
    pub fn is_idle(&self) -> bool {
        self.shared
            .queues
            .lock()
            .map(|queues| {
                queues
                    .values()
                    .all(|q| q.ready.is_empty() && q.unacked.is_empty())
            })
            .unwrap_or(false)
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn declare_queue(&self, name: &str) -> Result<(), BrokerError> {
        self.shared.lock()?.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        flags: PublishFlags,
        body: &[u8],
    ) -> Result<(), BrokerError> {
        let failing = self
            .shared
            .failing_publishes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BrokerError::PublishFailed("injected publish failure".to_string()));
        }

        let target = destination(exchange, routing_key);
        {
            let mut queues = self.shared.lock()?;
            let Some(queue) = queues.get_mut(&target) else {
                if flags.mandatory {
                    return Err(BrokerError::Unroutable(target));
                }
                debug!(destination = %target, "Dropping unroutable message");
                return Ok(());
            };

            let offset = queue.next_offset;
            queue.next_offset += 1;
            queue.ready.push_back(Delivery {
                tag: DeliveryTag {
                    queue: target.clone(),
                    partition: 0,
                    offset,
                },
                payload: body.to_vec(),
                redelivery_count: 0,
            });
        }

        self.shared.notify.notify_waiters();
        Ok(())
    }
}

pub struct InMemoryConsumer {
    shared: Arc<Shared>,
    queue: String,
}

impl InMemoryConsumer {
    fn settle(&self, tag: &DeliveryTag) -> Result<Delivery, BrokerError> {
        let mut queues = self.shared.lock()?;
        queues
            .get_mut(&tag.queue)
            .and_then(|q| q.unacked.remove(tag))
            .ok_or_else(|| BrokerError::Settle(format!("unknown delivery tag {:?}", tag)))
    }
}

#[async_trait]
impl QueueConsumer for InMemoryConsumer {
    async fn next_delivery(&self) -> Result<Option<Delivery>, BrokerError> {
        loop {
            // Registered before checking so a publish in between is not missed
            let notified = self.shared.notify.notified();

            {
                let mut queues = self.shared.lock()?;
                let queue = queues.get_mut(&self.queue).ok_or_else(|| {
                    BrokerError::Consume(format!("queue {} not declared", self.queue))
                })?;

                if let Some(delivery) = queue.ready.pop_front() {
                    queue.unacked.insert(delivery.tag.clone(), delivery.clone());
                    return Ok(Some(delivery));
                }
            }

            if self.shared.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }

            notified.await;
        }
    }

    async fn ack(&self, tag: &DeliveryTag) -> Result<(), BrokerError> {
        self.settle(tag)?;
        self.shared.acks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn nack(&self, tag: &DeliveryTag, requeue: bool) -> Result<(), BrokerError> {
        let mut delivery = self.settle(tag)?;

        if !requeue {
            self.shared.discards.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }

        delivery.redelivery_count += 1;
        if let Some(queue) = self.shared.lock()?.get_mut(&tag.queue) {
            queue.ready.push_front(delivery);
        }
        self.shared.requeues.fetch_add(1, Ordering::SeqCst);
        self.shared.notify.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn broker_with_queue(name: &str) -> InMemoryBroker {
        let broker = InMemoryBroker::new();
        broker.declare_queue(name).await.unwrap();
        broker
    }

    #[tokio::test]
    async fn test_publish_to_declared_queue_is_delivered() {
        let broker = broker_with_queue("orders").await;
        let consumer = broker.consumer("orders");

        broker
            .publish("", "orders", PublishFlags::mandatory(), b"hello")
            .await
            .unwrap();

        let delivery = consumer.next_delivery().await.unwrap().unwrap();
        assert_eq!(delivery.payload, b"hello");
        assert_eq!(delivery.redelivery_count, 0);

        consumer.ack(&delivery.tag).await.unwrap();
        assert_eq!(broker.ack_count(), 1);
        assert!(broker.is_idle());
    }

    #[tokio::test]
    async fn test_mandatory_publish_without_queue_fails() {
        let broker = InMemoryBroker::new();
        let err = broker
            .publish("", "missing", PublishFlags::mandatory(), b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Unroutable(ref q) if q == "missing"));

        // Non-mandatory publishes are silently dropped
        broker
            .publish("", "missing", PublishFlags::default(), b"x")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_requeue_redelivers_with_count() {
        let broker = broker_with_queue("orders").await;
        let consumer = broker.consumer("orders");
        broker
            .publish("", "orders", PublishFlags::default(), b"a")
            .await
            .unwrap();

        let first = consumer.next_delivery().await.unwrap().unwrap();
        consumer.nack(&first.tag, true).await.unwrap();

        let second = consumer.next_delivery().await.unwrap().unwrap();
        assert_eq!(second.tag, first.tag);
        assert_eq!(second.redelivery_count, 1);
        assert_eq!(broker.requeue_count(), 1);
    }

    #[tokio::test]
    async fn test_double_settle_is_rejected() {
        let broker = broker_with_queue("orders").await;
        let consumer = broker.consumer("orders");
        broker
            .publish("", "orders", PublishFlags::default(), b"a")
            .await
            .unwrap();

        let delivery = consumer.next_delivery().await.unwrap().unwrap();
        consumer.nack(&delivery.tag, false).await.unwrap();
        assert!(consumer.ack(&delivery.tag).await.is_err());
        assert_eq!(broker.discard_count(), 1);
    }

    #[tokio::test]
    async fn test_waiting_consumer_wakes_on_publish() {
        let broker = broker_with_queue("orders").await;
        let consumer = broker.consumer("orders");

        let publisher = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            publisher
                .publish("", "orders", PublishFlags::default(), b"late")
                .await
                .unwrap();
        });

        let delivery = tokio::time::timeout(Duration::from_secs(1), consumer.next_delivery())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(delivery.payload, b"late");
    }

    #[tokio::test]
    async fn test_close_ends_consumption() {
        let broker = broker_with_queue("orders").await;
        let consumer = broker.consumer("orders");
        broker.close();
        assert!(consumer.next_delivery().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_injected_publish_failure() {
        let broker = broker_with_queue("orders").await;
        broker.fail_next_publishes(1);

        assert!(broker
            .publish("", "orders", PublishFlags::default(), b"a")
            .await
            .is_err());
        broker
            .publish("", "orders", PublishFlags::default(), b"a")
            .await
            .unwrap();
        assert_eq!(broker.ready_messages("orders").len(), 1);
    }
}
