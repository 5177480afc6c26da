use common::config::{BrokerConfig, DispatcherConfig};
use common::metrics::record_event_publish;
use domain::OrderCreatedEvent;
use messaging::{MessageBroker, PublishFlags};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub queue: String,
    pub capacity: usize,
    pub publish_attempts: u32,
    pub retry_delay: Duration,
}

impl DispatcherSettings {
    pub fn from_config(dispatcher: &DispatcherConfig, broker: &BrokerConfig) -> Self {
        Self {
            queue: broker.order_queue.clone(),
            capacity: dispatcher.capacity,
            publish_attempts: dispatcher.publish_attempts,
            retry_delay: Duration::from_millis(dispatcher.retry_delay_ms),
        }
    }
}

/// Hands order events to a single background publisher.
///
/// Events wait in a bounded buffer; when it is full the event is dropped and
/// counted. Delivery is best effort: buffered events are lost if the process
/// dies before the publisher reaches them.
#[derive(Clone)]
pub struct EventDispatcher {
    tx: mpsc::Sender<OrderCreatedEvent>,
}

impl EventDispatcher {
    /// Start the publisher task. It stops once `shutdown` is cancelled and the
    /// buffer has been drained.
    pub fn spawn(
        broker: Arc<dyn MessageBroker>,
        settings: DispatcherSettings,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(settings.capacity.max(1));
        let publisher = Publisher { broker, settings };
        let handle = tokio::spawn(publisher.run(rx, shutdown));
        (Self { tx }, handle)
    }

    /// Queue an event without waiting. Returns false if it was dropped.
    pub fn dispatch(&self, event: OrderCreatedEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                error!(order_id = event.order_id, "Event buffer full, dropping order event");
                record_event_publish("dropped");
                false
            }
            Err(TrySendError::Closed(event)) => {
                error!(order_id = event.order_id, "Event publisher stopped, dropping order event");
                record_event_publish("dropped");
                false
            }
        }
    }
}

struct Publisher {
    broker: Arc<dyn MessageBroker>,
    settings: DispatcherSettings,
}

impl Publisher {
    async fn run(self, mut rx: mpsc::Receiver<OrderCreatedEvent>, shutdown: CancellationToken) {
        info!(queue = %self.settings.queue, "Event publisher started");

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(event) => self.publish(&event).await,
                    None => break,
                },
                _ = shutdown.cancelled() => {
                    rx.close();
                    let mut drained = 0;
                    while let Some(event) = rx.recv().await {
                        self.publish(&event).await;
                        drained += 1;
                    }
                    info!(drained, "Event publisher drained buffer");
                    break;
                }
            }
        }

        info!("Event publisher stopped");
    }

    async fn publish(&self, event: &OrderCreatedEvent) {
        let body = match serde_json::to_vec(event) {
            Ok(body) => body,
            Err(e) => {
                error!(order_id = event.order_id, error = %e, "Failed to serialize order event");
                record_event_publish("failed");
                return;
            }
        };

        let attempts = self.settings.publish_attempts.max(1);
        for attempt in 1..=attempts {
            match self
                .broker
                .publish("", &self.settings.queue, PublishFlags::mandatory(), &body)
                .await
            {
                Ok(()) => {
                    debug!(order_id = event.order_id, attempt, "Order event published");
                    record_event_publish("published");
                    return;
                }
                Err(e) if attempt < attempts => {
                    warn!(order_id = event.order_id, attempt, error = %e, "Publish failed, retrying");
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
                Err(e) => {
                    error!(
                        order_id = event.order_id,
                        attempts,
                        error = %e,
                        "Giving up on order event"
                    );
                    record_event_publish("failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use messaging::InMemoryBroker;

    const QUEUE: &str = "order_created_queue";

    fn settings(capacity: usize) -> DispatcherSettings {
        DispatcherSettings {
            queue: QUEUE.to_string(),
            capacity,
            publish_attempts: 3,
            retry_delay: Duration::ZERO,
        }
    }

    fn event(order_id: i64) -> OrderCreatedEvent {
        OrderCreatedEvent {
            order_id,
            user_id: 1,
            message: domain::events::order_events::ORDER_RECEIVED_MESSAGE.to_string(),
            total: 10.0,
        }
    }

    async fn declared_broker() -> InMemoryBroker {
        let broker = InMemoryBroker::new();
        broker.declare_queue(QUEUE).await.unwrap();
        broker
    }

    fn order_ids(broker: &InMemoryBroker) -> Vec<i64> {
        broker
            .ready_messages(QUEUE)
            .iter()
            .map(|body| serde_json::from_slice::<OrderCreatedEvent>(body).unwrap().order_id)
            .collect()
    }

    #[tokio::test]
    async fn test_shutdown_drains_buffered_events_in_order() {
        let broker = declared_broker().await;
        let shutdown = CancellationToken::new();
        let (dispatcher, handle) =
            EventDispatcher::spawn(Arc::new(broker.clone()), settings(16), shutdown.clone());

        for id in 1..=3 {
            assert!(dispatcher.dispatch(event(id)));
        }
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(order_ids(&broker), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_full_buffer_drops_events() {
        let broker = declared_broker().await;
        let shutdown = CancellationToken::new();
        let (dispatcher, handle) =
            EventDispatcher::spawn(Arc::new(broker.clone()), settings(1), shutdown.clone());

        // The publisher task has not run yet on this single-threaded runtime
        assert!(dispatcher.dispatch(event(1)));
        assert!(!dispatcher.dispatch(event(2)));

        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(order_ids(&broker), vec![1]);
    }

    #[tokio::test]
    async fn test_transient_publish_failures_are_retried() {
        let broker = declared_broker().await;
        broker.fail_next_publishes(2);
        let shutdown = CancellationToken::new();
        let (dispatcher, handle) =
            EventDispatcher::spawn(Arc::new(broker.clone()), settings(4), shutdown.clone());

        dispatcher.dispatch(event(7));
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(order_ids(&broker), vec![7]);
    }

    #[tokio::test]
    async fn test_publisher_gives_up_after_attempts_and_continues() {
        let broker = declared_broker().await;
        broker.fail_next_publishes(3);
        let shutdown = CancellationToken::new();
        let (dispatcher, handle) =
            EventDispatcher::spawn(Arc::new(broker.clone()), settings(4), shutdown.clone());

        dispatcher.dispatch(event(1));
        dispatcher.dispatch(event(2));
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(order_ids(&broker), vec![2]);
    }

    #[tokio::test]
    async fn test_undeclared_queue_is_not_silently_accepted() {
        let broker = InMemoryBroker::new();
        let shutdown = CancellationToken::new();
        let (dispatcher, handle) =
            EventDispatcher::spawn(Arc::new(broker.clone()), settings(4), shutdown.clone());

        dispatcher.dispatch(event(1));
        shutdown.cancel();
        handle.await.unwrap();

        assert!(broker.ready_messages(QUEUE).is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_after_stop_is_dropped() {
        let broker = declared_broker().await;
        let shutdown = CancellationToken::new();
        let (dispatcher, handle) =
            EventDispatcher::spawn(Arc::new(broker.clone()), settings(4), shutdown.clone());

        shutdown.cancel();
        handle.await.unwrap();
        assert!(!dispatcher.dispatch(event(1)));
    }
}
