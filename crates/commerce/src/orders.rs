use common::metrics::record_operation_duration;
use domain::{CreateOrderCommand, NewOrder, Order, OrderCreatedEvent, OrderFilter, OrderStatus};
use persistence::OrderRepository;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::dispatcher::EventDispatcher;
use crate::errors::ServiceError;

/// Order creation and administration. Fulfillment happens asynchronously in
/// the [`FulfillmentWorker`](crate::worker::FulfillmentWorker).
pub struct OrderPipeline {
    repository: Arc<dyn OrderRepository>,
    dispatcher: EventDispatcher,
}

impl OrderPipeline {
    pub fn new(repository: Arc<dyn OrderRepository>, dispatcher: EventDispatcher) -> Self {
        Self {
            repository,
            dispatcher,
        }
    }

    /// Persist a Pending order and queue its creation event. The order is
    /// returned as soon as the row is written; publishing never affects the
    /// result.
    pub async fn create_order(&self, cmd: CreateOrderCommand) -> Result<Order, ServiceError> {
        let start = Instant::now();
        let new_order = NewOrder::from_command(cmd)?;
        let order = self.repository.insert(&new_order).await?;

        info!(order_id = order.id, user_id = order.user_id, "Order created");
        self.dispatcher
            .dispatch(OrderCreatedEvent::from_order(&order));

        record_operation_duration("create_order", start.elapsed().as_secs_f64());
        Ok(order)
    }

    pub async fn get_order(&self, id: i64) -> Result<Order, ServiceError> {
        Ok(self.repository.get_by_id(id).await?)
    }

    pub async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, ServiceError> {
        Ok(self.repository.list(filter).await?)
    }

    pub async fn update_order_status(
        &self,
        id: i64,
        status: OrderStatus,
    ) -> Result<Order, ServiceError> {
        let order = self.repository.update_status(id, status).await?;
        info!(order_id = id, status = %status, "Order status updated");
        Ok(order)
    }

    pub async fn update_order_total_price(
        &self,
        id: i64,
        total_price: f64,
    ) -> Result<Order, ServiceError> {
        if !total_price.is_finite() || total_price < 0.0 {
            return Err(ServiceError::Validation(format!(
                "total_price must be a non-negative number, got {total_price}"
            )));
        }

        let order = self.repository.update_total_price(id, total_price).await?;
        info!(order_id = id, total_price, "Order total updated");
        Ok(order)
    }

    pub async fn delete_order(&self, id: i64) -> Result<(), ServiceError> {
        self.repository.delete(id).await?;
        info!(order_id = id, "Order deleted");
        Ok(())
    }
}
