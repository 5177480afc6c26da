pub mod memory;
pub mod redis_cache;

pub use memory::InMemoryCache;
pub use redis_cache::RedisCache;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Key under which a product's JSON is cached
pub fn product_cache_key(id: i64) -> String {
    format!("product:{}", id)
}

/// Expiring key/value cache in front of the primary store.
///
/// A missing key is `Ok(None)`; `Err` means the cache itself could not be
/// reached, which callers treat as a miss but report separately.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache connection error: {0}")]
    Connection(String),

    #[error("Cache command failed: {0}")]
    Command(String),
}
