//! Cache collaborator used by the domain service.
//!
//! The domain service never reads through a cache; it only drops keys that a
//! write made stale. Patient-scoped data lives under `patient:<id>:` keys.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

/// Key prefix for everything cached about one patient's chart.
pub fn patient_prefix(patient_id: &str) -> String {
    format!("patient:{patient_id}:")
}

#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    /// Drops every key starting with `prefix`. Returns how many were removed.
    async fn invalidate_prefix(&self, prefix: &str) -> Result<usize, CacheError>;
}

/// Invalidator for deployments without a cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

#[async_trait]
impl CacheInvalidator for NoopCache {
    async fn invalidate_prefix(&self, _prefix: &str) -> Result<usize, CacheError> {
        Ok(0)
    }
}

#[derive(Clone, Debug)]
pub struct CachedEntry {
    pub data: Arc<Vec<u8>>,
    pub cached_at: Instant,
    pub ttl: Duration,
}

impl CachedEntry {
    pub fn new(data: Vec<u8>, ttl: Duration) -> Self {
        Self {
            data: Arc::new(data),
            cached_at: Instant::now(),
            ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

/// Single-instance cache on a `DashMap`.
#[derive(Clone, Default)]
pub struct LocalCache {
    entries: Arc<DashMap<String, CachedEntry>>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        let entry = self.entries.get(key)?;
        if entry.is_expired() {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        Some(Arc::clone(&entry.data))
    }

    pub fn set(&self, key: impl Into<String>, data: Vec<u8>, ttl: Duration) {
        self.entries.insert(key.into(), CachedEntry::new(data, ttl));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheInvalidator for LocalCache {
    async fn invalidate_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        let removed = before.saturating_sub(self.entries.len());
        tracing::debug!(prefix, removed, "Invalidated cache prefix");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalidate_prefix_only_touches_matching_keys() {
        let cache = LocalCache::new();
        let ttl = Duration::from_secs(60);
        cache.set("patient:101:chart", b"a".to_vec(), ttl);
        cache.set("patient:101:documents", b"b".to_vec(), ttl);
        cache.set("patient:1010:chart", b"c".to_vec(), ttl);
        cache.set("practice:7", b"d".to_vec(), ttl);

        let removed = cache
            .invalidate_prefix(&patient_prefix("101"))
            .await
            .unwrap();

        assert_eq!(removed, 2);
        assert!(cache.get("patient:101:chart").is_none());
        assert!(cache.get("patient:1010:chart").is_some());
        assert!(cache.get("practice:7").is_some());
    }

    #[test]
    fn test_expired_entries_are_dropped_on_read() {
        let cache = LocalCache::new();
        cache.set("patient:1:chart", b"x".to_vec(), Duration::ZERO);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("patient:1:chart").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_noop_cache() {
        assert_eq!(NoopCache.invalidate_prefix("patient:1:").await.unwrap(), 0);
    }
}
