use serde::{Deserialize, Serialize};

use crate::order::Order;

pub const ORDER_RECEIVED_MESSAGE: &str = "Order received. Email will be sent";

/// Published once per created order on the order queue. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCreatedEvent {
    pub order_id: i64,
    pub user_id: i64,
    pub message: String,
    pub total: f64,
}

impl OrderCreatedEvent {
    pub fn from_order(order: &Order) -> Self {
        Self {
            order_id: order.id,
            user_id: order.user_id,
            message: ORDER_RECEIVED_MESSAGE.to_string(),
            total: order.total_price,
        }
    }
}

/// The part of an order queue message the fulfillment worker needs
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrderMessage {
    pub order_id: i64,
}
