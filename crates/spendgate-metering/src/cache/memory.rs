//! In-memory cache backend using DashMap
//!
//! Expiry uses `tokio::time::Instant`, so paused-clock tests can advance
//! through TTLs deterministically.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

use super::{CacheBackend, CacheError};

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

/// Process-local cache backend
#[derive(Debug)]
pub struct InMemoryCacheBackend {
    entries: DashMap<String, MemoryEntry>,
    max_entries: usize,
}

impl InMemoryCacheBackend {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove `key` only if it is still expired at `now`; a concurrent `set`
    /// may have replaced it since it was read
    fn remove_expired(&self, key: &str, now: Instant) {
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
    }

    fn evict_for_insert(&self, now: Instant) {
        if self.entries.len() < self.max_entries {
            return;
        }
        self.entries.retain(|_, entry| entry.expires_at > now);

        // Still full: drop the entry closest to expiry
        if self.entries.len() >= self.max_entries {
            let victim = self
                .entries
                .iter()
                .min_by_key(|entry| entry.expires_at)
                .map(|entry| entry.key().clone());
            if let Some(key) = victim {
                self.entries.remove(&key);
            }
        }
    }
}

impl Default for InMemoryCacheBackend {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.remove_expired(key, now);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        if !self.entries.contains_key(key) {
            self.evict_for_insert(now);
        }
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn del_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = InMemoryCacheBackend::new(16);
        cache
            .set("quota:org:openai:gpt-4o", "[]".into(), Duration::from_secs(300))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(cache.get("quota:org:openai:gpt-4o").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("quota:org:openai:gpt-4o").await.unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_read_keeps_fresh_replacement() {
        let cache = InMemoryCacheBackend::new(16);
        cache.set("k", "old".into(), Duration::from_secs(1)).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        // Observed expiry at `now`, then a writer replaces the entry before removal
        let now = Instant::now();
        cache.set("k", "new".into(), Duration::from_secs(60)).await.unwrap();
        cache.remove_expired("k", now);

        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_del_prefix() {
        let cache = InMemoryCacheBackend::new(16);
        let ttl = Duration::from_secs(60);
        cache.set("quota:org-1:openai:a", "1".into(), ttl).await.unwrap();
        cache.set("quota:org-1:openai:b", "1".into(), ttl).await.unwrap();
        cache.set("quota:org-10:openai:a", "1".into(), ttl).await.unwrap();
        cache.set("usage:org-1:summary:daily", "1".into(), ttl).await.unwrap();

        assert_eq!(cache.del_prefix("quota:org-1:").await.unwrap(), 2);
        assert_eq!(cache.len(), 2);
        assert!(cache.get("quota:org-10:openai:a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_eviction_keeps_capacity() {
        let cache = InMemoryCacheBackend::new(2);
        for i in 0..5 {
            cache
                .set(&format!("k{i}"), "v".into(), Duration::from_secs(60 + i))
                .await
                .unwrap();
        }
        assert!(cache.len() <= 2);
        assert!(cache.get("k4").await.unwrap().is_some());
    }
}
