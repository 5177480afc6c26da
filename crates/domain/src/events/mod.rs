pub mod order_events;
