pub mod order_commands;
pub mod product_commands;

pub use order_commands::CreateOrderCommand;
pub use product_commands::CreateProductCommand;
