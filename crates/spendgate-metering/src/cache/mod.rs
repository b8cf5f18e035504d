//! Cache-aside layer
//!
//! [`CacheLayer`] sits in front of the authoritative store as a latency
//! optimization only. Every failure mode of the backing cache (not
//! configured, unreachable, slow, holding undecodable data) degrades to a
//! miss or a no-op, so callers always fall through to the store:
//!
//! ```text
//! get     -> None
//! set/del -> no-op
//! get_or_set -> fetch()
//! ```

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub use self::memory::InMemoryCacheBackend;
pub use self::redis::RedisCacheBackend;

/// Default bound on a single cache round trip
pub const DEFAULT_CACHE_OP_TIMEOUT: Duration = Duration::from_millis(250);

/// Raw string cache backend
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a value if present and unexpired
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store a value with a TTL
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Remove a single key
    async fn del(&self, key: &str) -> Result<(), CacheError>;

    /// Remove every key starting with `prefix`, returning the count removed
    async fn del_prefix(&self, prefix: &str) -> Result<u64, CacheError>;
}

/// Errors raised by cache backends
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("Cache connection failed: {0}")]
    Connection(String),

    #[error("Cache command failed: {0}")]
    Command(String),
}

/// Degrading cache-aside handle
///
/// Cheap to clone; all clones share one backend.
#[derive(Clone)]
pub struct CacheLayer {
    backend: Option<Arc<dyn CacheBackend>>,
    op_timeout: Duration,
}

impl CacheLayer {
    /// Cache backed by `backend`
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend: Some(backend),
            op_timeout: DEFAULT_CACHE_OP_TIMEOUT,
        }
    }

    /// Cache that always misses
    pub fn disabled() -> Self {
        Self {
            backend: None,
            op_timeout: DEFAULT_CACHE_OP_TIMEOUT,
        }
    }

    /// Bound every backend call by `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Cached value for `key`, or `None` on miss or any cache failure
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let backend = self.backend.as_ref()?;
        let raw = self.guarded("get", key, backend.get(key)).await.flatten();

        let Some(raw) = raw else {
            debug!(key, "Cache miss");
            return None;
        };

        match serde_json::from_str(&raw) {
            Ok(value) => {
                debug!(key, "Cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(key, error = %e, "Discarding undecodable cache entry");
                self.guarded("del", key, backend.del(key)).await;
                None
            }
        }
    }

    /// Store `value` under `key`; failures are logged and ignored
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };

        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "Failed to encode cache entry");
                return;
            }
        };

        if self
            .guarded("set", key, backend.set(key, raw, ttl))
            .await
            .is_some()
        {
            debug!(key, ttl_secs = ttl.as_secs(), "Cached value");
        }
    }

    /// Remove `key`; failures are logged and ignored
    pub async fn del(&self, key: &str) {
        if let Some(backend) = self.backend.as_ref() {
            self.guarded("del", key, backend.del(key)).await;
        }
    }

    /// Remove every key starting with `prefix`; returns 0 on failure
    pub async fn del_pattern(&self, prefix: &str) -> u64 {
        let Some(backend) = self.backend.as_ref() else {
            return 0;
        };

        let deleted = self
            .guarded("del_prefix", prefix, backend.del_prefix(prefix))
            .await
            .unwrap_or(0);
        debug!(prefix, deleted, "Invalidated cache entries");
        deleted
    }

    /// Cache-aside read
    ///
    /// On hit returns the cached value. On miss calls `fetch`, caches an `Ok`
    /// result and returns it. Concurrent misses may each call `fetch`. Errors
    /// from `fetch` are returned unchanged and nothing is cached.
    pub async fn get_or_set<T, E, F, Fut>(&self, key: &str, ttl: Duration, fetch: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.get(key).await {
            return Ok(cached);
        }

        let value = fetch().await?;
        self.set(key, &value, ttl).await;
        Ok(value)
    }

    /// Run a backend call under the timeout, mapping every failure to `None`
    async fn guarded<T, Fut>(&self, op: &'static str, key: &str, call: Fut) -> Option<T>
    where
        Fut: Future<Output = Result<T, CacheError>>,
    {
        match tokio::time::timeout(self.op_timeout, call).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                warn!(op, key, error = %e, "Cache unavailable, falling through");
                None
            }
            Err(_) => {
                warn!(
                    op,
                    key,
                    timeout_ms = self.op_timeout.as_millis() as u64,
                    "Cache timed out, falling through"
                );
                None
            }
        }
    }
}

impl Default for CacheLayer {
    fn default() -> Self {
        Self::disabled()
    }
}

impl std::fmt::Debug for CacheLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheLayer")
            .field("enabled", &self.is_enabled())
            .field("op_timeout", &self.op_timeout)
            .finish()
    }
}

/// Cache key for the quota snapshot of one call shape
pub fn quota_key(organization_id: &str, provider: &str, model: &str) -> String {
    format!("quota:{organization_id}:{provider}:{model}")
}

/// Prefix covering every quota snapshot of an organization
pub fn quota_prefix(organization_id: &str) -> String {
    format!("quota:{organization_id}:")
}

/// Prefix covering every usage summary of an organization
pub fn usage_prefix(organization_id: &str) -> String {
    format!("usage:{organization_id}:")
}

/// Cache key for current pricing
pub fn pricing_key(provider: &str, model: &str) -> String {
    format!("pricing:{provider}:{model}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend that fails every call
    struct UnreachableBackend;

    #[async_trait]
    impl CacheBackend for UnreachableBackend {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Connection("connection refused".into()))
        }

        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Connection("connection refused".into()))
        }

        async fn del(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::Connection("connection refused".into()))
        }

        async fn del_prefix(&self, _prefix: &str) -> Result<u64, CacheError> {
            Err(CacheError::Connection("connection refused".into()))
        }
    }

    /// Backend whose calls never complete
    struct HangingBackend;

    #[async_trait]
    impl CacheBackend for HangingBackend {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            std::future::pending().await
        }

        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
            std::future::pending().await
        }

        async fn del(&self, _key: &str) -> Result<(), CacheError> {
            std::future::pending().await
        }

        async fn del_prefix(&self, _prefix: &str) -> Result<u64, CacheError> {
            std::future::pending().await
        }
    }

    #[test]
    fn test_key_layout() {
        assert_eq!(quota_key("org-1", "openai", "gpt-4o"), "quota:org-1:openai:gpt-4o");
        assert!(quota_key("org-1", "openai", "gpt-4o").starts_with(&quota_prefix("org-1")));
        assert_eq!(usage_prefix("org-1"), "usage:org-1:");
    }

    #[tokio::test]
    async fn test_get_or_set_populates_cache() {
        let cache = CacheLayer::new(Arc::new(InMemoryCacheBackend::new(16)));
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value: Result<u32, ()> = cache
                .get_or_set("k", Duration::from_secs(60), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .await;
            assert_eq!(value, Ok(7));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_errors_are_not_cached() {
        let cache = CacheLayer::new(Arc::new(InMemoryCacheBackend::new(16)));

        let first: Result<u32, &str> = cache
            .get_or_set("k", Duration::from_secs(60), || async { Err("store down") })
            .await;
        assert_eq!(first, Err("store down"));
        assert_eq!(cache.get::<u32>("k").await, None);
    }

    #[tokio::test]
    async fn test_unreachable_backend_degrades_to_miss() {
        let cache = CacheLayer::new(Arc::new(UnreachableBackend));
        let calls = AtomicUsize::new(0);

        cache.set("k", &1u32, Duration::from_secs(60)).await;
        assert_eq!(cache.get::<u32>("k").await, None);
        cache.del("k").await;
        assert_eq!(cache.del_pattern("quota:").await, 0);

        for _ in 0..2 {
            let value: Result<u32, ()> = cache
                .get_or_set("k", Duration::from_secs(60), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(3)
                })
                .await;
            assert_eq!(value, Ok(3));
        }
        // Every read falls through to the source of truth
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_backend_times_out() {
        let cache = CacheLayer::new(Arc::new(HangingBackend)).with_timeout(Duration::from_millis(50));

        let value: Result<u32, ()> = cache
            .get_or_set("k", Duration::from_secs(60), || async { Ok(11) })
            .await;
        assert_eq!(value, Ok(11));
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_a_miss() {
        let backend = Arc::new(InMemoryCacheBackend::new(16));
        backend
            .set("k", "not json".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        let cache = CacheLayer::new(backend.clone());
        assert_eq!(cache.get::<u32>("k").await, None);
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_disabled_cache() {
        let cache = CacheLayer::disabled();
        assert!(!cache.is_enabled());
        cache.set("k", &1u32, Duration::from_secs(60)).await;
        assert_eq!(cache.get::<u32>("k").await, None);
    }
}
