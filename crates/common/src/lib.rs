pub mod config;
pub mod metrics;
pub mod retry;
pub mod telemetry;

pub use config::AppConfig;
pub use retry::{retry_with_policy, RetryPolicy};
