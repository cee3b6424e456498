//! Volatile key/value tier in front of the credential store.
//!
//! The cache is never authoritative: every caller treats a miss or a cache
//! failure as "go to the store".

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use self::memory::MemoryCache;
pub use self::redis::RedisCache;

#[derive(Debug, Error)]
#[error("cache error: {0}")]
pub struct CacheError(#[from] pub anyhow::Error);

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;
    /// A zero TTL stores nothing.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Read and remove in one step. Backends that can do this atomically
    /// override it.
    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let value = self.get(key).await?;
        if value.is_some() {
            self.delete(key).await?;
        }
        Ok(value)
    }

    async fn health_check(&self) -> Result<(), CacheError>;
}

/// Typed JSON view over a [`CacheStore`]. Undecodable entries are treated
/// as misses and evicted.
#[derive(Clone)]
pub struct JsonCache {
    inner: Arc<dyn CacheStore>,
}

impl JsonCache {
    pub fn new(inner: Arc<dyn CacheStore>) -> Self {
        Self { inner }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.inner.get(key).await? {
            Some(bytes) => Ok(self.decode(key, &bytes).await),
            None => Ok(None),
        }
    }

    pub async fn take<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.inner.take(key).await? {
            Some(bytes) => Ok(self.decode(key, &bytes).await),
            None => Ok(None),
        }
    }

    pub async fn set<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(value).map_err(|e| CacheError(anyhow::anyhow!(e)))?;
        self.inner.set(key, &bytes, ttl).await
    }

    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.inner.delete(key).await
    }

    async fn decode<T: DeserializeOwned>(&self, key: &str, bytes: &[u8]) -> Option<T> {
        match serde_json::from_slice(bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                if let Err(e) = self.inner.delete(key).await {
                    tracing::warn!(
                        key = %key,
                        error = %e,
                        "Failed to evict undecodable cache entry"
                    );
                }
                None
            }
        }
    }
}
