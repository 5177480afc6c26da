use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::Validate;

use crate::commands::CreateOrderCommand;
use crate::errors::DomainError;

/// Fulfillment status of an order: Pending until the worker (or an
/// administrator) marks it Shipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Shipped,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Shipped => "SHIPPED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(OrderStatus::Pending),
            "SHIPPED" => Ok(OrderStatus::Shipped),
            _ => Err(DomainError::UnknownOrderStatus(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub total_price: f64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Column values for an order insert
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub user_id: i64,
    pub total_price: f64,
    pub status: OrderStatus,
}

impl NewOrder {
    pub fn from_command(cmd: CreateOrderCommand) -> Result<Self, DomainError> {
        cmd.validate()?;

        Ok(Self {
            user_id: cmd.user_id,
            total_price: cmd.total_price,
            status: OrderStatus::Pending,
        })
    }
}

/// Optional filters for listing orders
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OrderFilter {
    pub user_id: Option<i64>,
    pub status: Option<OrderStatus>,
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        self.user_id.map_or(true, |id| order.user_id == id)
            && self.status.map_or(true, |status| order.status == status)
    }
}
