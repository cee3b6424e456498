use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use std::time::Duration;

use super::{CacheError, CacheStore};
use crate::config::RedisConfig;

/// Redis-backed cache tier using an auto-reconnecting connection manager.
#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(config: &RedisConfig) -> Result<Self, CacheError> {
        tracing::info!("Connecting to Redis cache");
        let client = Client::open(config.url.clone()).map_err(|e| CacheError(e.into()))?;

        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to get Redis connection manager");
            CacheError(anyhow::anyhow!("Failed to connect to Redis: {}", e))
        })?;

        tracing::info!("Redis cache connected");
        Ok(Self { manager })
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async::<_, Option<Vec<u8>>>(&mut conn)
            .await
            .map_err(|e| CacheError(anyhow::anyhow!("Failed to get cache key: {}", e)))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        if ttl.is_zero() {
            return self.delete(key).await;
        }
        let mut conn = self.manager.clone();
        // PX keeps sub-second TTLs from rounding down to "no expiry".
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_ms)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| CacheError(anyhow::anyhow!("Failed to set cache key: {}", e)))
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<_, i64>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| CacheError(anyhow::anyhow!("Failed to delete cache key: {}", e)))
    }

    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.manager.clone();
        redis::cmd("GETDEL")
            .arg(key)
            .query_async::<_, Option<Vec<u8>>>(&mut conn)
            .await
            .map_err(|e| CacheError(anyhow::anyhow!("Failed to take cache key: {}", e)))
    }

    async fn health_check(&self) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| CacheError(anyhow::anyhow!("Redis health check failed: {}", e)))
    }
}
