//! Short-TTL key-value cache and queue client (Redis).
//!
//! The connection manager is initialized lazily under a mutex with a
//! double-check so concurrent first callers share one connection. Callers
//! that can degrade (rate limiter, stats) treat errors as a soft miss;
//! callers that cannot (event capture) surface `DependencyUnavailable`.

use std::sync::OnceLock;

use redis::aio::ConnectionManager;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::types::{AppError, Result};

/// Process-scoped cache handle. Cheap to clone; all clones share the
/// underlying connection manager once initialized.
#[derive(Clone)]
pub struct Cache {
    url: Option<String>,
    manager: std::sync::Arc<CacheInner>,
}

struct CacheInner {
    cell: OnceLock<ConnectionManager>,
    init_lock: tokio::sync::Mutex<()>,
}

impl Cache {
    /// Create a cache handle. `url: None` produces a permanently unavailable
    /// cache; every operation returns `DependencyUnavailable`.
    pub fn new(url: Option<String>) -> Self {
        Self {
            url,
            manager: std::sync::Arc::new(CacheInner {
                cell: OnceLock::new(),
                init_lock: tokio::sync::Mutex::const_new(()),
            }),
        }
    }

    /// Whether a cache URL was configured at all.
    pub fn configured(&self) -> bool {
        self.url.is_some()
    }

    /// Raw connection handle for callers issuing stream commands (broker).
    pub async fn connection(&self) -> Result<ConnectionManager> {
        self.conn().await
    }

    async fn conn(&self) -> Result<ConnectionManager> {
        if let Some(manager) = self.manager.cell.get() {
            return Ok(manager.clone());
        }

        let url = self
            .url
            .as_deref()
            .ok_or_else(|| AppError::DependencyUnavailable("cache not configured".to_string()))?;

        let _guard = self.manager.init_lock.lock().await;
        if let Some(manager) = self.manager.cell.get() {
            return Ok(manager.clone());
        }

        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        tracing::info!("cache connection initialized");
        let _ = self.manager.cell.set(manager.clone());
        Ok(manager)
    }

    /// Fetch and deserialize a JSON value. `None` on missing key.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.conn().await?;
        let raw: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        match raw {
            Some(raw) => {
                let value = serde_json::from_str(&raw)
                    .map_err(|e| AppError::Internal(format!("cache payload decode: {}", e)))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Serialize and store a JSON value with a TTL.
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) -> Result<()> {
        let raw = serde_json::to_string(value)
            .map_err(|e| AppError::Internal(format!("cache payload encode: {}", e)))?;
        let mut conn = self.conn().await?;
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(raw)
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// SET NX EX: returns true when the key was newly set, false when it
    /// already existed.
    pub async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        let mut conn = self.conn().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    /// Append a raw value to a list.
    pub async fn rpush(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: () = redis::cmd("RPUSH")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Pop up to `count` values from the head of a list.
    pub async fn lpop_batch(&self, key: &str, count: usize) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        let values: Option<Vec<String>> = redis::cmd("LPOP")
            .arg(key)
            .arg(count)
            .query_async(&mut conn)
            .await?;
        Ok(values.unwrap_or_default())
    }

    /// Atomic counter with a TTL set on first increment. Backs the
    /// token-bucket rate limiter.
    pub async fn incr_with_ttl(&self, key: &str, ttl_secs: u64) -> Result<i64> {
        let mut conn = self.conn().await?;
        let count: i64 = redis::cmd("INCR").arg(key).query_async(&mut conn).await?;
        if count == 1 {
            let _: () = redis::cmd("EXPIRE")
                .arg(key)
                .arg(ttl_secs)
                .query_async(&mut conn)
                .await?;
        }
        Ok(count)
    }

    /// Delete a key. Used by tests and cache invalidation.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: () = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_cache_is_unavailable() {
        let cache = Cache::new(None);
        assert!(!cache.configured());

        let result = cache.get_json::<String>("any").await;
        assert!(matches!(result, Err(AppError::DependencyUnavailable(_))));
    }
}
