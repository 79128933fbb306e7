//! Cache plane
//!
//! The core consumes an opaque key-value store with TTLs; it does not own
//! one. [`Cache`] is the collaborator interface, [`MemoryCache`] the
//! in-process implementation, and [`CacheManager`] layers the read-through /
//! write-through / write-behind access patterns on top.

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::LedgerError;

pub mod keys;
pub mod memory;
pub mod strategies;

pub use memory::MemoryCache;
pub use strategies::CacheManager;

/// Frequently changing data.
pub const SHORT_EXPIRATION: Duration = Duration::from_secs(5 * 60);
/// Moderately changing data.
pub const MEDIUM_EXPIRATION: Duration = Duration::from_secs(30 * 60);
/// Rarely changing data.
pub const LONG_EXPIRATION: Duration = Duration::from_secs(2 * 60 * 60);

/// Opaque key-value store with TTLs. Values are serialized bytes; the cache
/// never interprets them. Patterns are key prefixes terminated by `*`.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), LedgerError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, LedgerError>;

    async fn delete(&self, key: &str) -> Result<(), LedgerError>;

    async fn exists(&self, key: &str) -> Result<bool, LedgerError>;

    /// Delete every key matching the pattern; returns the number removed.
    async fn delete_pattern(&self, pattern: &str) -> Result<u64, LedgerError>;

    async fn get_keys(&self, pattern: &str) -> Result<Vec<String>, LedgerError>;

    async fn set_multiple(
        &self,
        entries: &[(String, Vec<u8>)],
        ttl: Duration,
    ) -> Result<(), LedgerError>;

    /// Values in the same order as `keys`; misses are `None`.
    async fn get_multiple(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, LedgerError>;

    async fn delete_multiple(&self, keys: &[String]) -> Result<(), LedgerError>;

    async fn ping(&self) -> Result<(), LedgerError>;
}

/// Match a key against a Redis-style pattern (literal, or prefix + `*`).
pub(crate) fn key_matches(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_matches() {
        assert!(key_matches("balance:user:1", "balance:user:1"));
        assert!(!key_matches("balance:user:1", "balance:user:12"));
        assert!(key_matches("balance:user:*", "balance:user:12"));
        assert!(key_matches("user:*", "user:id:5"));
        assert!(!key_matches("transaction:*", "balance:user:1"));
    }
}
