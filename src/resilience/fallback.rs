//! Fallback manager
//!
//! Strategy-driven recovery around registered primary operations. When the
//! primary fails the configured strategy decides what the caller sees:
//! a cached value, a default, the result of bounded retries with exponential
//! backoff, or a degraded-mode computation. Results move as JSON values so
//! heterogeneous operations can share one registry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crossbeam_queue::ArrayQueue;
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::errors::LedgerError;
use crate::resilience::CircuitBreaker;

/// Capacity of the background retry queue.
const RETRY_QUEUE_CAPACITY: usize = 1000;

/// Idle sleep for retry workers when the queue is empty.
const RETRY_IDLE_SLEEP: Duration = Duration::from_millis(50);

pub type PrimaryFn = Arc<dyn Fn() -> BoxFuture<'static, Result<Value, LedgerError>> + Send + Sync>;
pub type DegradedFn = Arc<dyn Fn() -> BoxFuture<'static, Result<Value, LedgerError>> + Send + Sync>;
pub type RetryFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), LedgerError>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackStrategy {
    /// Serve the last cached result; fall back to the default value on miss.
    Cache,
    /// Return the configured default value.
    Default,
    /// Re-invoke the primary up to `max_retries` times with doubling delay.
    Retry,
    /// Invoke a user-supplied best-effort computation.
    Degraded,
}

/// One registered recovery path.
pub struct FallbackConfig {
    pub name: String,
    pub primary: PrimaryFn,
    pub strategy: FallbackStrategy,
    /// Degraded-mode computation; also the last resort after failed retries.
    pub degraded: Option<DegradedFn>,
    pub max_retries: u32,
    pub retry_interval: Duration,
    /// Overall deadline for primary + recovery. Zero means none.
    pub timeout: Duration,
    pub circuit_breaker: Option<Arc<CircuitBreaker>>,
    pub cache_key: String,
    pub cache_ttl: Duration,
    pub default_value: Option<Value>,
}

impl FallbackConfig {
    pub fn new(name: impl Into<String>, strategy: FallbackStrategy, primary: PrimaryFn) -> Self {
        Self {
            name: name.into(),
            primary,
            strategy,
            degraded: None,
            max_retries: 0,
            retry_interval: Duration::ZERO,
            timeout: Duration::ZERO,
            circuit_breaker: None,
            cache_key: String::new(),
            cache_ttl: Duration::from_secs(300),
            default_value: None,
        }
    }
}

/// Local TTL cache for fallback values. Expired entries are dropped lazily
/// on read and swept when new values are inserted.
struct ValueCache {
    entries: DashMap<String, (Value, Instant)>,
}

impl ValueCache {
    fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    fn get(&self, key: &str) -> Option<Value> {
        let expired = match self.entries.get(key) {
            Some(entry) => {
                if entry.1 > Instant::now() {
                    return Some(entry.0.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    fn set(&self, key: &str, value: Value, ttl: Duration) {
        let now = Instant::now();
        self.entries.retain(|_, (_, expires)| *expires > now);
        self.entries.insert(key.to_string(), (value, now + ttl));
    }
}

pub struct FallbackManager {
    strategies: RwLock<HashMap<String, Arc<FallbackConfig>>>,
    cache: ValueCache,
    retry_queue: Arc<RetryQueue>,
}

impl FallbackManager {
    pub fn new() -> Self {
        Self {
            strategies: RwLock::new(HashMap::new()),
            cache: ValueCache::new(),
            retry_queue: RetryQueue::start(5),
        }
    }

    pub fn register(&self, config: FallbackConfig) {
        tracing::info!(name = %config.name, strategy = ?config.strategy, "Fallback registered");
        self.strategies
            .write()
            .unwrap()
            .insert(config.name.clone(), Arc::new(config));
    }

    /// Execute the named operation with its recovery strategy.
    pub async fn execute(&self, name: &str) -> Result<Value, LedgerError> {
        let config = self
            .strategies
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| LedgerError::Cache(format!("fallback configuration not found: {}", name)))?;

        if config.timeout.is_zero() {
            return self.execute_inner(&config).await;
        }

        match tokio::time::timeout(config.timeout, self.execute_inner(&config)).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Storage(sqlx::Error::PoolTimedOut)),
        }
    }

    /// Enqueue a background retry item.
    pub fn queue_retry(&self, item: RetryItem) {
        self.retry_queue.add(item);
    }

    pub fn retry_queue_len(&self) -> usize {
        self.retry_queue.len()
    }

    pub fn registered(&self) -> usize {
        self.strategies.read().unwrap().len()
    }

    async fn execute_inner(&self, config: &FallbackConfig) -> Result<Value, LedgerError> {
        match self.execute_primary(config).await {
            Ok(value) => {
                if config.strategy == FallbackStrategy::Cache && !config.cache_key.is_empty() {
                    self.cache
                        .set(&config.cache_key, value.clone(), config.cache_ttl);
                }
                Ok(value)
            }
            Err(err) => self.execute_fallback(config, err).await,
        }
    }

    async fn execute_primary(&self, config: &FallbackConfig) -> Result<Value, LedgerError> {
        match &config.circuit_breaker {
            Some(breaker) => breaker.call(|| (config.primary)()).await,
            None => (config.primary)().await,
        }
    }

    async fn execute_fallback(
        &self,
        config: &FallbackConfig,
        primary_err: LedgerError,
    ) -> Result<Value, LedgerError> {
        match config.strategy {
            FallbackStrategy::Cache => self.fallback_cache(config, primary_err),
            FallbackStrategy::Default => Self::fallback_default(config, primary_err),
            FallbackStrategy::Retry => self.fallback_retry(config, primary_err).await,
            FallbackStrategy::Degraded => Self::fallback_degraded(config, primary_err).await,
        }
    }

    fn fallback_cache(
        &self,
        config: &FallbackConfig,
        primary_err: LedgerError,
    ) -> Result<Value, LedgerError> {
        if config.cache_key.is_empty() {
            return Err(LedgerError::Cache(
                "cache key not specified for cache fallback".to_string(),
            ));
        }

        if let Some(value) = self.cache.get(&config.cache_key) {
            tracing::info!(name = %config.name, cache_key = %config.cache_key, "Fallback cache hit");
            return Ok(value);
        }

        if let Some(default) = &config.default_value {
            tracing::info!(name = %config.name, "Fallback to default value");
            return Ok(default.clone());
        }

        Err(primary_err)
    }

    fn fallback_default(
        config: &FallbackConfig,
        primary_err: LedgerError,
    ) -> Result<Value, LedgerError> {
        match &config.default_value {
            Some(default) => {
                tracing::info!(name = %config.name, "Fallback to default value");
                Ok(default.clone())
            }
            None => Err(primary_err),
        }
    }

    async fn fallback_retry(
        &self,
        config: &FallbackConfig,
        primary_err: LedgerError,
    ) -> Result<Value, LedgerError> {
        let max_retries = if config.max_retries == 0 {
            3
        } else {
            config.max_retries
        };
        let mut interval = if config.retry_interval.is_zero() {
            Duration::from_secs(1)
        } else {
            config.retry_interval
        };

        for attempt in 1..=max_retries {
            tokio::time::sleep(interval).await;

            match self.execute_primary(config).await {
                Ok(value) => {
                    tracing::info!(name = %config.name, attempt, "Retry successful");
                    return Ok(value);
                }
                Err(err) => {
                    tracing::warn!(name = %config.name, attempt, error = %err, "Retry attempt failed");
                }
            }

            interval *= 2;
        }

        if let Some(degraded) = &config.degraded {
            return degraded().await;
        }

        Err(primary_err)
    }

    async fn fallback_degraded(
        config: &FallbackConfig,
        primary_err: LedgerError,
    ) -> Result<Value, LedgerError> {
        match &config.degraded {
            Some(degraded) => {
                tracing::info!(name = %config.name, "Executing degraded mode");
                degraded().await
            }
            None => Err(primary_err),
        }
    }
}

impl Default for FallbackManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Work item for the background retry queue.
#[derive(Clone)]
pub struct RetryItem {
    pub id: String,
    pub function: RetryFn,
    pub max_retries: u32,
    pub interval: Duration,
    pub attempt: u32,
}

/// Bounded background queue re-invoking failed operations.
///
/// Workers drain the queue; a failed item is rescheduled after its interval
/// until `max_retries` is exhausted, then dropped.
pub struct RetryQueue {
    items: ArrayQueue<RetryItem>,
}

impl RetryQueue {
    pub fn start(workers: usize) -> Arc<Self> {
        let queue = Arc::new(Self {
            items: ArrayQueue::new(RETRY_QUEUE_CAPACITY),
        });

        for _ in 0..workers {
            let queue = queue.clone();
            tokio::spawn(async move {
                loop {
                    match queue.items.pop() {
                        Some(item) => queue.clone().process(item).await,
                        None => tokio::time::sleep(RETRY_IDLE_SLEEP).await,
                    }
                }
            });
        }

        queue
    }

    pub fn add(&self, item: RetryItem) {
        if self.items.push(item).is_err() {
            tracing::error!("Retry queue is full, dropping item");
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    async fn process(self: Arc<Self>, mut item: RetryItem) {
        item.attempt += 1;

        match (item.function)().await {
            Ok(()) => {
                tracing::info!(item_id = %item.id, attempt = item.attempt, "Retry operation successful");
            }
            Err(err) if item.attempt < item.max_retries => {
                tracing::warn!(
                    item_id = %item.id,
                    attempt = item.attempt,
                    error = %err,
                    "Retry operation failed, rescheduling"
                );
                let queue = self.clone();
                let interval = item.interval;
                tokio::spawn(async move {
                    tokio::time::sleep(interval).await;
                    queue.add(item);
                });
            }
            Err(err) => {
                tracing::error!(
                    item_id = %item.id,
                    attempt = item.attempt,
                    max_retries = item.max_retries,
                    error = %err,
                    "Retry operation failed permanently"
                );
            }
        }
    }
}
