use anyhow::Result;
use commerce::{OrderPipeline, ProductCoordinator};
use common::config::AppConfig;
use common::{retry_with_policy, RetryPolicy};
use messaging::{KafkaBroker, MessageBroker};
use persistence::{
    OrderRepository, PostgresOrderRepository, PostgresProductRepository, ProductRepository,
};
use read_model::{CacheStore, ElasticsearchIndex, RedisCache, SearchIndex};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::Arc;
use tracing::info;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub products: Arc<ProductCoordinator>,
    pub orders: Arc<OrderPipeline>,
}

impl AppState {
    pub fn new(products: ProductCoordinator, orders: OrderPipeline) -> Self {
        Self {
            products: Arc::new(products),
            orders: Arc::new(orders),
        }
    }
}

/// Downstream clients, each built once at startup
pub struct Backends {
    pub pool: PgPool,
    pub product_repository: Arc<dyn ProductRepository>,
    pub order_repository: Arc<dyn OrderRepository>,
    pub cache: Arc<dyn CacheStore>,
    pub search: Arc<dyn SearchIndex>,
    pub broker: Arc<dyn MessageBroker>,
}

impl Backends {
    /// Connect to every backend, retrying each one under the startup policy.
    /// The process should not start serving if this fails.
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        let policy = RetryPolicy::from(&config.startup);

        info!("Connecting to database");
        let pool = retry_with_policy("postgres", policy, || {
            PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .connect(&config.database.url)
        })
        .await?;
        persistence::run_migrations(&pool).await?;
        info!("Database connected and migrated");

        info!("Connecting to Redis");
        let cache = retry_with_policy("redis", policy, || RedisCache::new(&config.cache.redis_url))
            .await?;

        info!(index = %config.search.index, "Connecting to Elasticsearch");
        let search = ElasticsearchIndex::new(&config.search.url, &config.search.index)?;
        retry_with_policy("elasticsearch", policy, || search.ping()).await?;

        info!("Connecting to Kafka");
        let broker = retry_with_policy("kafka", policy, || {
            KafkaBroker::connect(&config.broker.brokers)
        })
        .await?;
        broker.declare_queue(&config.broker.order_queue).await?;
        broker
            .declare_queue(&config.broker.dead_letter_queue())
            .await?;
        info!(queue = %config.broker.order_queue, "Order queue declared");

        Ok(Self {
            product_repository: Arc::new(PostgresProductRepository::new(pool.clone())),
            order_repository: Arc::new(PostgresOrderRepository::new(pool.clone())),
            pool,
            cache: Arc::new(cache),
            search: Arc::new(search),
            broker: Arc::new(broker),
        })
    }
}
