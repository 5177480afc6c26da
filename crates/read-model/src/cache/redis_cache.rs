use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError};
use std::time::Duration;
use tracing::{debug, info};

use super::{CacheError, CacheStore};

/// Redis-backed product cache
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    /// Connect to Redis
    pub async fn new(redis_url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url).map_err(|e| {
            CacheError::Connection(format!("Failed to create Redis client: {}", e))
        })?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::Connection(format!("Failed to connect to Redis: {}", e)))?;

        info!("Redis cache connected");
        Ok(Self { conn })
    }
}

fn command_error(e: RedisError) -> CacheError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
        CacheError::Connection(e.to_string())
    } else {
        CacheError::Command(e.to_string())
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let value: Option<String> = self.conn.clone().get(key).await.map_err(command_error)?;
        debug!(key, hit = value.is_some(), "Redis GET");
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let seconds = ttl.as_secs().max(1);
        let _: () = self
            .conn
            .clone()
            .set_ex(key, value, seconds)
            .await
            .map_err(command_error)?;

        debug!(key, ttl_seconds = seconds, "Cached value");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let _: () = self.conn.clone().del(key).await.map_err(command_error)?;
        debug!(key, "Deleted cache entry");
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let _: String = redis::cmd("PING")
            .query_async(&mut self.conn.clone())
            .await
            .map_err(|e| CacheError::Connection(format!("Redis ping failed: {}", e)))?;
        Ok(())
    }
}
