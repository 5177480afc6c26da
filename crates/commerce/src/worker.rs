use common::config::{AckMode, BrokerConfig, WorkerConfig};
use common::metrics::record_worker_delivery;
use domain::OrderMessage;
use messaging::{Delivery, MessageBroker, PublishFlags, QueueConsumer};
use persistence::{OrderRepository, ShipOutcome, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How deliveries are settled once processed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckPolicy {
    /// Ack every delivery, including failed ones
    AlwaysAck,
    /// Ack successes, requeue transient failures until `max_attempts`
    /// deliveries have been made, dead-letter everything else
    RetryThenDeadLetter {
        max_attempts: u32,
        dead_letter_queue: String,
    },
}

impl AckPolicy {
    pub fn from_config(worker: &WorkerConfig, broker: &BrokerConfig) -> Self {
        match worker.ack_mode {
            AckMode::AlwaysAck => AckPolicy::AlwaysAck,
            AckMode::RetryDeadLetter => AckPolicy::RetryThenDeadLetter {
                max_attempts: worker.max_attempts.max(1),
                dead_letter_queue: broker.dead_letter_queue(),
            },
        }
    }
}

/// What happened to one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Shipped,
    AlreadyShipped,
    Requeued,
    DeadLettered,
    /// Failed but acked anyway under [`AckPolicy::AlwaysAck`]
    Dropped,
}

impl DeliveryOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Shipped => "shipped",
            DeliveryOutcome::AlreadyShipped => "already_shipped",
            DeliveryOutcome::Requeued => "requeued",
            DeliveryOutcome::DeadLettered => "dead_lettered",
            DeliveryOutcome::Dropped => "dropped",
        }
    }
}

enum Failure {
    /// Retrying cannot help (bad payload, unknown order)
    Permanent(String),
    Transient(String),
}

impl From<StoreError> for Failure {
    fn from(err: StoreError) -> Self {
        if err.is_not_found() {
            Failure::Permanent(err.to_string())
        } else {
            Failure::Transient(err.to_string())
        }
    }
}

/// Consumes order-created deliveries one at a time and marks each order
/// Shipped
pub struct FulfillmentWorker {
    orders: Arc<dyn OrderRepository>,
    consumer: Arc<dyn QueueConsumer>,
    broker: Arc<dyn MessageBroker>,
    policy: AckPolicy,
    retry_delay: Duration,
}

impl FulfillmentWorker {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        consumer: Arc<dyn QueueConsumer>,
        broker: Arc<dyn MessageBroker>,
        policy: AckPolicy,
        retry_delay: Duration,
    ) -> Self {
        Self {
            orders,
            consumer,
            broker,
            policy,
            retry_delay,
        }
    }

    /// Process deliveries until `shutdown` is cancelled or the consumer
    /// closes. An in-flight delivery is always finished first.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(policy = ?self.policy, "Fulfillment worker started");

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = self.consumer.next_delivery() => next,
            };

            match next {
                Ok(Some(delivery)) => {
                    self.handle_delivery(delivery).await;
                }
                Ok(None) => {
                    info!("Order queue closed");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Failed to receive delivery");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }
        }

        info!("Fulfillment worker stopped");
    }

    /// Process and settle a single delivery
    pub async fn handle_delivery(&self, delivery: Delivery) -> DeliveryOutcome {
        let outcome = match self.process(&delivery).await {
            Ok(ShipOutcome::Shipped(order)) => {
                info!(order_id = order.id, "Order shipped");
                self.ack(&delivery).await;
                DeliveryOutcome::Shipped
            }
            Ok(ShipOutcome::AlreadyShipped(order)) => {
                debug!(order_id = order.id, "Order already shipped, ignoring duplicate");
                self.ack(&delivery).await;
                DeliveryOutcome::AlreadyShipped
            }
            Err(failure) => self.settle_failure(&delivery, failure).await,
        };

        record_worker_delivery(outcome.as_str());
        outcome
    }

    async fn process(&self, delivery: &Delivery) -> Result<ShipOutcome, Failure> {
        let message: OrderMessage = serde_json::from_slice(&delivery.payload)
            .map_err(|e| Failure::Permanent(format!("undecodable order message: {}", e)))?;

        Ok(self.orders.mark_shipped(message.order_id).await?)
    }

    async fn settle_failure(&self, delivery: &Delivery, failure: Failure) -> DeliveryOutcome {
        let attempt = delivery.redelivery_count + 1;

        match &self.policy {
            AckPolicy::AlwaysAck => {
                let reason = match failure {
                    Failure::Permanent(reason) | Failure::Transient(reason) => reason,
                };
                warn!(attempt, reason = %reason, "Order status update failed, acking anyway");
                self.ack(delivery).await;
                DeliveryOutcome::Dropped
            }
            AckPolicy::RetryThenDeadLetter {
                max_attempts,
                dead_letter_queue,
            } => {
                let reason = match failure {
                    Failure::Transient(reason) if attempt < *max_attempts => {
                        warn!(attempt, reason = %reason, "Order status update failed, requeueing");
                        tokio::time::sleep(self.retry_delay).await;
                        self.requeue(delivery).await;
                        return DeliveryOutcome::Requeued;
                    }
                    Failure::Transient(reason) | Failure::Permanent(reason) => reason,
                };

                match self
                    .broker
                    .publish("", dead_letter_queue, PublishFlags::mandatory(), &delivery.payload)
                    .await
                {
                    Ok(()) => {
                        error!(
                            attempt,
                            reason = %reason,
                            queue = %dead_letter_queue,
                            "Order message dead-lettered"
                        );
                        self.ack(delivery).await;
                        DeliveryOutcome::DeadLettered
                    }
                    Err(e) => {
                        error!(error = %e, reason = %reason, "Dead-letter publish failed, requeueing");
                        self.requeue(delivery).await;
                        DeliveryOutcome::Requeued
                    }
                }
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) {
        if let Err(e) = self.consumer.ack(&delivery.tag).await {
            error!(tag = ?delivery.tag, error = %e, "Failed to ack delivery");
        }
    }

    async fn requeue(&self, delivery: &Delivery) {
        if let Err(e) = self.consumer.nack(&delivery.tag, true).await {
            error!(tag = ?delivery.tag, error = %e, "Failed to requeue delivery");
        }
    }
}
