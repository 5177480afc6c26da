use serde::{Deserialize, Serialize};
use validator::Validate;

/// Command to create a new order
///
/// Orders always start as Pending; a status sent by the client is ignored.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateOrderCommand {
    #[validate(range(min = 1, message = "user_id is required"))]
    pub user_id: i64,

    #[validate(range(min = 0.0, message = "Total price cannot be negative"))]
    pub total_price: f64,
}
