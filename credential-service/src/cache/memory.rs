use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{CacheError, CacheStore};

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// In-process cache with per-entry expiry. Expired entries are dropped on
/// read, and writes sweep the whole map at most once per sweep interval.
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
    sweep_interval: Duration,
    last_sweep: Mutex<Instant>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sweep_interval(sweep_interval: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            sweep_interval,
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        let now = Instant::now();
        self.entries.retain(|_, e| e.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    fn sweep_if_due(&self) {
        let due = match self.last_sweep.lock() {
            Ok(mut last) if last.elapsed() >= self.sweep_interval => {
                *last = Instant::now();
                true
            }
            _ => false,
        };
        if due {
            let removed = self.purge_expired();
            if removed > 0 {
                tracing::debug!(removed, "Swept expired cache entries");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return Ok(Some(entry.value.clone()));
            }
        }
        self.entries.remove_if(key, |_, e| e.expires_at <= now);
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        self.sweep_if_due();
        if ttl.is_zero() {
            self.entries.remove(key);
            return Ok(());
        }
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self
            .entries
            .remove(key)
            .filter(|(_, e)| e.expires_at > Instant::now())
            .map(|(_, e)| e.value))
    }

    async fn health_check(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_entry_expires() -> Result<(), CacheError> {
        let cache = MemoryCache::new();
        cache.set("a", b"1", Duration::from_millis(20)).await?;
        assert_eq!(cache.get("a").await?, Some(b"1".to_vec()));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get("a").await?, None);
        assert!(cache.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_take_is_single_use() -> Result<(), CacheError> {
        let cache = MemoryCache::new();
        cache.set("state", b"x", Duration::from_secs(60)).await?;
        assert!(cache.take("state").await?.is_some());
        assert!(cache.take("state").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_zero_ttl_stores_nothing() -> Result<(), CacheError> {
        let cache = MemoryCache::new();
        cache.set("a", b"1", Duration::ZERO).await?;
        assert_eq!(cache.get("a").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_abandoned_entries_are_swept_on_write() -> Result<(), CacheError> {
        let cache = MemoryCache::with_sweep_interval(Duration::from_millis(60));
        for i in 0..1000 {
            let key = format!("oauthstate:{}", i);
            cache.set(&key, b"pending", Duration::from_millis(50)).await?;
        }
        assert_eq!(cache.len(), 1000);

        tokio::time::sleep(Duration::from_millis(150)).await;
        cache.set("live", b"1", Duration::from_secs(60)).await?;

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("live").await?, Some(b"1".to_vec()));
        Ok(())
    }

    #[tokio::test]
    async fn test_purge_expired_keeps_live_entries() -> Result<(), CacheError> {
        let cache = MemoryCache::new();
        cache.set("short", b"1", Duration::from_millis(10)).await?;
        cache.set("long", b"2", Duration::from_secs(60)).await?;

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("long").await?.is_some());
        Ok(())
    }
}
