pub mod memory;
pub mod postgres_order_repository;
pub mod postgres_product_repository;

pub use memory::{InMemoryOrderRepository, InMemoryProductRepository};
pub use postgres_order_repository::PostgresOrderRepository;
pub use postgres_product_repository::PostgresProductRepository;
pub use sqlx;

use async_trait::async_trait;
use domain::{NewOrder, NewProduct, Order, OrderFilter, OrderStatus, Product};
use sqlx::PgPool;
use thiserror::Error;

/// Primary store for catalog products (source of truth)
#[async_trait]
pub trait ProductRepository: Send + Sync {
    /// All products ordered by id
    async fn list_all(&self) -> Result<Vec<Product>, StoreError>;

    async fn get_by_id(&self, id: i64) -> Result<Product, StoreError>;

    /// Insert a product; the store assigns id and timestamps
    async fn insert(&self, product: &NewProduct) -> Result<Product, StoreError>;

    /// Replace every column of an existing product
    async fn update(&self, id: i64, product: &NewProduct) -> Result<Product, StoreError>;

    async fn delete(&self, id: i64) -> Result<(), StoreError>;
}

/// Primary store for orders (source of truth)
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn insert(&self, order: &NewOrder) -> Result<Order, StoreError>;

    async fn get_by_id(&self, id: i64) -> Result<Order, StoreError>;

    async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError>;

    /// Set the status unconditionally (administrative path)
    async fn update_status(&self, id: i64, status: OrderStatus) -> Result<Order, StoreError>;

    /// Replace the total price, leaving the status as it is
    async fn update_total_price(&self, id: i64, total_price: f64) -> Result<Order, StoreError>;

    async fn delete(&self, id: i64) -> Result<(), StoreError>;

    /// Transition Pending -> Shipped. Applying it to an order that is already
    /// Shipped changes nothing and reports [`ShipOutcome::AlreadyShipped`].
    async fn mark_shipped(&self, id: i64) -> Result<ShipOutcome, StoreError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShipOutcome {
    Shipped(Order),
    AlreadyShipped(Order),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    DatabaseError(sqlx::Error),

    #[error("Invalid row: {0}")]
    InvalidRow(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Whether the failure comes from reaching the database rather than from
    /// the statement itself
    pub fn is_connectivity(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::DatabaseError(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_string())
            }
            _ => StoreError::DatabaseError(err),
        }
    }
}

/// Apply the bundled schema migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
