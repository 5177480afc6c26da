pub mod dispatcher;
pub mod errors;
pub mod orders;
pub mod products;
pub mod worker;

pub use dispatcher::{DispatcherSettings, EventDispatcher};
pub use errors::ServiceError;
pub use orders::OrderPipeline;
pub use products::{ProductCoordinator, SyncReport, DEFAULT_CACHE_TTL};
pub use worker::{AckPolicy, DeliveryOutcome, FulfillmentWorker};
