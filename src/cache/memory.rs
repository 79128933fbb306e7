//! In-process TTL cache
//!
//! Concurrent map of key -> (bytes, deadline). Expired entries are dropped
//! lazily on read and swept by an optional background ticker.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{Cache, key_matches};
use crate::errors::LedgerError;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

struct Entry {
    data: Vec<u8>,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at <= Instant::now()
    }
}

pub struct MemoryCache {
    entries: DashMap<String, Entry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Spawn the periodic sweep of expired entries.
    pub fn spawn_cleanup(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let before = cache.entries.len();
                cache.entries.retain(|_, entry| !entry.is_expired());
                let removed = before.saturating_sub(cache.entries.len());
                if removed > 0 {
                    tracing::debug!(removed, "Cache cleanup removed expired entries");
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), LedgerError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                data: value.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, LedgerError> {
        let expired = match self.entries.get(key) {
            Some(entry) => {
                if !entry.is_expired() {
                    return Ok(Some(entry.data.clone()));
                }
                true
            }
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn delete(&self, key: &str) -> Result<(), LedgerError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, LedgerError> {
        Ok(self.get(key).await?.is_some())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, LedgerError> {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key_matches(pattern, key));
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }

    async fn get_keys(&self, pattern: &str) -> Result<Vec<String>, LedgerError> {
        Ok(self
            .entries
            .iter()
            .filter(|entry| !entry.value().is_expired() && key_matches(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn set_multiple(
        &self,
        entries: &[(String, Vec<u8>)],
        ttl: Duration,
    ) -> Result<(), LedgerError> {
        for (key, value) in entries {
            self.set(key, value, ttl).await?;
        }
        Ok(())
    }

    async fn get_multiple(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, LedgerError> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    async fn delete_multiple(&self, keys: &[String]) -> Result<(), LedgerError> {
        for key in keys {
            self.entries.remove(key);
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), LedgerError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let cache = MemoryCache::new();
        cache
            .set("k", b"value", Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(cache.get("k").await.unwrap(), Some(b"value".to_vec()));
        assert!(cache.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let cache = MemoryCache::new();
        cache.set("k", b"v", Duration::from_millis(10)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(!cache.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_pattern() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);
        cache.set("balance:user:1", b"a", ttl).await.unwrap();
        cache.set("balance:user:2", b"b", ttl).await.unwrap();
        cache.set("transaction:user:1", b"c", ttl).await.unwrap();

        let removed = cache.delete_pattern("balance:user:*").await.unwrap();
        assert_eq!(removed, 2);
        assert!(cache.get("balance:user:1").await.unwrap().is_none());
        assert!(cache.get("transaction:user:1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_get_keys_and_multi_ops() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);
        cache
            .set_multiple(
                &[
                    ("user:id:1".to_string(), b"u1".to_vec()),
                    ("user:id:2".to_string(), b"u2".to_vec()),
                ],
                ttl,
            )
            .await
            .unwrap();

        let mut keys = cache.get_keys("user:id:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["user:id:1", "user:id:2"]);

        let values = cache
            .get_multiple(&["user:id:1".to_string(), "user:id:9".to_string()])
            .await
            .unwrap();
        assert_eq!(values[0], Some(b"u1".to_vec()));
        assert_eq!(values[1], None);

        cache
            .delete_multiple(&["user:id:1".to_string(), "user:id:2".to_string()])
            .await
            .unwrap();
        assert!(cache.is_empty());
    }
}
