//! Caching access patterns
//!
//! - Read-through: serve from cache, fetch and populate on miss.
//! - Write-through: write the source first, then the cache; a cache write
//!   failure is non-fatal because the source already holds the truth.
//! - Write-behind: update the cache immediately and write the source
//!   asynchronously; the async failure is logged, never surfaced.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::Cache;
use crate::errors::LedgerError;

#[derive(Clone)]
pub struct CacheManager {
    cache: Arc<dyn Cache>,
}

impl CacheManager {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    /// Serve `key` from cache; on miss call `fetch`, populate, and return.
    /// Cache faults degrade to the source instead of failing the read.
    pub async fn read_through<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<T, LedgerError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        match self.cache.get(key).await {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(value) => {
                    tracing::debug!(key, "Cache hit for read-through");
                    return Ok(value);
                }
                Err(err) => {
                    tracing::warn!(key, error = %err, "Cached payload undecodable, refetching");
                }
            },
            Ok(None) => {
                tracing::debug!(key, "Cache miss, fetching from source");
            }
            Err(err) => {
                tracing::error!(key, error = %err, "Cache error in read-through");
            }
        }

        let value = fetch().await?;

        match serde_json::to_vec(&value) {
            Ok(bytes) => {
                if let Err(err) = self.cache.set(key, &bytes, ttl).await {
                    tracing::error!(key, error = %err, "Cache set error in read-through");
                }
            }
            Err(err) => {
                tracing::error!(key, error = %err, "Cache encode error in read-through");
            }
        }

        Ok(value)
    }

    /// Write the source first; on success mirror the value into the cache.
    pub async fn write_through<T, F, Fut>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
        writer: F,
    ) -> Result<(), LedgerError>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), LedgerError>>,
    {
        writer().await?;

        match serde_json::to_vec(value) {
            Ok(bytes) => {
                if let Err(err) = self.cache.set(key, &bytes, ttl).await {
                    // Source already updated; the cache will heal on next read.
                    tracing::error!(key, error = %err, "Cache set error in write-through");
                }
            }
            Err(err) => {
                tracing::error!(key, error = %err, "Cache encode error in write-through");
            }
        }

        tracing::debug!(key, "Write-through completed");
        Ok(())
    }

    /// Update the cache now; run the source write in the background.
    pub async fn write_behind<T, F, Fut>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
        writer: F,
    ) -> Result<(), LedgerError>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), LedgerError>> + Send + 'static,
    {
        let bytes = serde_json::to_vec(value).map_err(|e| LedgerError::Cache(e.to_string()))?;
        self.cache.set(key, &bytes, ttl).await?;

        let key = key.to_string();
        let write = writer();
        tokio::spawn(async move {
            match write.await {
                Ok(()) => tracing::debug!(key, "Async write-behind completed"),
                Err(err) => {
                    tracing::error!(key, error = %err, "Async source write error in write-behind");
                }
            }
        });

        Ok(())
    }

    /// Drop every key in the list; used by the invalidation cascades.
    pub async fn invalidate(&self, keys: &[String]) {
        if let Err(err) = self.cache.delete_multiple(keys).await {
            tracing::error!(error = %err, "Cache invalidation failed");
        }
    }
}
