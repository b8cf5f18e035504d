//! Redis cache backend
//!
//! Keeps one multiplexed connection, established lazily and dropped on any
//! command error so the next call reconnects. Keys are namespaced under a
//! configurable prefix.

use ::redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use super::{CacheBackend, CacheError};
use spendgate_common::{Result, SpendgateError};

/// Keys deleted per DEL round trip during prefix invalidation
const DEL_BATCH: usize = 500;

/// Redis-based cache backend
pub struct RedisCacheBackend {
    /// Redis client
    client: Client,
    /// Shared connection, `None` until connected or after a failure
    connection: Arc<RwLock<Option<MultiplexedConnection>>>,
    /// Namespace prepended to every key
    namespace: String,
}

impl RedisCacheBackend {
    /// Create a backend and connect immediately
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let backend = Self::open(redis_url)?;
        backend
            .get_connection()
            .await
            .map_err(|e| SpendgateError::Cache(e.to_string()))?;
        Ok(backend)
    }

    /// Create a backend that connects on first use
    pub fn open(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| SpendgateError::Config(format!("Invalid Redis URL: {}", e)))?;

        Ok(Self {
            client,
            connection: Arc::new(RwLock::new(None)),
            namespace: "spendgate".to_string(),
        })
    }

    /// Use a custom key namespace
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    /// Get the shared connection, connecting if needed
    async fn get_connection(&self) -> std::result::Result<MultiplexedConnection, CacheError> {
        let guard = self.connection.read().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        drop(guard);

        let mut guard = self.connection.write().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let connection = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        debug!("Connected to Redis");
        *guard = Some(connection.clone());
        Ok(connection)
    }

    /// Drop the shared connection after a command failure
    async fn reset_connection(&self, error: &::redis::RedisError) -> CacheError {
        warn!(error = %error, "Redis command failed, resetting connection");
        *self.connection.write().await = None;
        CacheError::Command(error.to_string())
    }
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    async fn get(&self, key: &str) -> std::result::Result<Option<String>, CacheError> {
        let mut conn = self.get_connection().await?;
        match conn.get::<_, Option<String>>(self.namespaced(key)).await {
            Ok(value) => Ok(value),
            Err(e) => Err(self.reset_connection(&e).await),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> std::result::Result<(), CacheError> {
        let mut conn = self.get_connection().await?;
        let ttl_secs = ttl.as_secs().max(1);

        match conn
            .set_ex::<_, _, ()>(self.namespaced(key), value, ttl_secs)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => Err(self.reset_connection(&e).await),
        }
    }

    async fn del(&self, key: &str) -> std::result::Result<(), CacheError> {
        let mut conn = self.get_connection().await?;
        match conn.del::<_, u64>(self.namespaced(key)).await {
            Ok(_) => Ok(()),
            Err(e) => Err(self.reset_connection(&e).await),
        }
    }

    #[instrument(skip(self))]
    async fn del_prefix(&self, prefix: &str) -> std::result::Result<u64, CacheError> {
        let pattern = format!("{}*", escape_glob(&self.namespaced(prefix)));
        let mut conn = self.get_connection().await?;

        // SCAN instead of KEYS so large keyspaces do not block the server
        let mut keys: Vec<String> = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let scanned: std::result::Result<(u64, Vec<String>), _> = ::redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(DEL_BATCH)
                .query_async(&mut conn)
                .await;

            let (next, batch) = match scanned {
                Ok(page) => page,
                Err(e) => return Err(self.reset_connection(&e).await),
            };
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        let mut deleted = 0u64;
        for chunk in keys.chunks(DEL_BATCH) {
            match conn.del::<_, u64>(chunk).await {
                Ok(count) => deleted += count,
                Err(e) => return Err(self.reset_connection(&e).await),
            }
        }
        Ok(deleted)
    }
}

/// Escape Redis glob metacharacters so a prefix matches literally
fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
