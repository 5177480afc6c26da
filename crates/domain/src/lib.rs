pub mod commands;
pub mod errors;
pub mod events;
pub mod order;
pub mod product;
pub mod slug;

pub use commands::{CreateOrderCommand, CreateProductCommand};
pub use errors::DomainError;
pub use events::order_events::{OrderCreatedEvent, OrderMessage};
pub use order::{NewOrder, Order, OrderFilter, OrderStatus};
pub use product::{NewProduct, Product};
