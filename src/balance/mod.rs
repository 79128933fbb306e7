//! Balance kernel
//!
//! The only writer of balances and balance history. Each mutation is an
//! atomic read-modify-write under row-level exclusion; insufficient funds is
//! rejected inside the critical section with the row unchanged. On success
//! the kernel appends a history row, a `balance_updated` event, and an audit
//! entry - all best-effort - then invalidates and repopulates the balance
//! cache keys. The authoritative value is always the store.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::cache::{CacheManager, keys};
use crate::core_types::{TransactionId, UserId};
use crate::errors::LedgerError;
use crate::events::EventStoreService;
use crate::models::{
    AggregateType, AuditAction, Balance, BalanceHistory, BalanceOperation, EntityType, EventType,
};
use crate::persistence::{AuditLogRepository, BalanceRepository, NewAuditLog, NewBalanceHistory};
use crate::resilience::CircuitBreaker;

pub struct BalanceService {
    repo: Arc<dyn BalanceRepository>,
    audit: Arc<dyn AuditLogRepository>,
    events: Arc<EventStoreService>,
    cache: Option<CacheManager>,
    cache_ttl: Duration,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl BalanceService {
    pub fn new(
        repo: Arc<dyn BalanceRepository>,
        audit: Arc<dyn AuditLogRepository>,
        events: Arc<EventStoreService>,
    ) -> Self {
        Self {
            repo,
            audit,
            events,
            cache: None,
            cache_ttl: Duration::from_secs(300),
            breaker: None,
        }
    }

    pub fn with_cache(mut self, cache: CacheManager, ttl: Duration) -> Self {
        self.cache = Some(cache);
        self.cache_ttl = ttl;
        self
    }

    /// Route mutations through the shared database circuit breaker. Domain
    /// rejections do not count as breaker failures.
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    async fn guarded_atomic_update(
        &self,
        user_id: UserId,
        apply: &(dyn Fn(Decimal) -> Result<Decimal, LedgerError> + Send + Sync),
    ) -> Result<Balance, LedgerError> {
        match &self.breaker {
            Some(breaker) => {
                breaker
                    .call(|| self.repo.atomic_update(user_id, apply))
                    .await
            }
            None => self.repo.atomic_update(user_id, apply).await,
        }
    }

    /// Idempotent zero-amount initialization. The first creation emits the
    /// aggregate's `balance_updated` event at version 1.
    pub async fn initialize_balance(&self, user_id: UserId) -> Result<(), LedgerError> {
        let created = self.repo.initialize(user_id).await?;
        if !created {
            return Ok(());
        }

        let balance = Balance {
            user_id,
            amount: Decimal::ZERO,
            last_updated_at: Utc::now(),
        };
        self.emit_event(&balance).await;
        self.emit_audit(user_id, AuditAction::Create, "Balance initialized".to_string())
            .await;

        tracing::info!(user_id, "Balance initialized");
        Ok(())
    }

    pub async fn get_balance(&self, user_id: UserId) -> Result<Balance, LedgerError> {
        if let Some(cache) = &self.cache {
            let repo = self.repo.clone();
            return cache
                .read_through(&keys::balance_by_user(user_id), self.cache_ttl, || async move {
                    repo.find_by_user_id(user_id)
                        .await?
                        .ok_or(LedgerError::BalanceNotFound(user_id))
                })
                .await;
        }

        self.repo
            .find_by_user_id(user_id)
            .await?
            .ok_or(LedgerError::BalanceNotFound(user_id))
    }

    /// Credit with operation = deposit. Rejects non-positive amounts.
    pub async fn deposit_atomically(
        &self,
        user_id: UserId,
        amount: Decimal,
    ) -> Result<Balance, LedgerError> {
        self.credit(user_id, amount, BalanceOperation::Deposit, None)
            .await
    }

    /// Debit with operation = withdraw. Rejects when the result would go
    /// negative, leaving the row unchanged.
    pub async fn withdraw_atomically(
        &self,
        user_id: UserId,
        amount: Decimal,
    ) -> Result<Balance, LedgerError> {
        self.debit(user_id, amount, BalanceOperation::Withdraw, None)
            .await
    }

    /// Credit leg of a transfer (or compensation); records the owning
    /// transaction in the history row.
    pub async fn credit(
        &self,
        user_id: UserId,
        amount: Decimal,
        operation: BalanceOperation,
        transaction_id: Option<TransactionId>,
    ) -> Result<Balance, LedgerError> {
        let amount = validate_amount(amount)?;

        let previous = Mutex::new(Decimal::ZERO);
        let updated = self
            .guarded_atomic_update(user_id, &|current| {
                *previous.lock().unwrap() = current;
                Ok(current + amount)
            })
            .await?;
        let previous = *previous.lock().unwrap();

        self.after_mutation(previous, &updated, operation, transaction_id)
            .await;

        tracing::info!(
            user_id,
            amount = %amount,
            new_balance = %updated.amount,
            operation = operation.as_str(),
            "Balance credited"
        );
        Ok(updated)
    }

    /// Debit leg of a transfer (or rollback).
    pub async fn debit(
        &self,
        user_id: UserId,
        amount: Decimal,
        operation: BalanceOperation,
        transaction_id: Option<TransactionId>,
    ) -> Result<Balance, LedgerError> {
        let amount = validate_amount(amount)?;

        let previous = Mutex::new(Decimal::ZERO);
        let updated = self
            .guarded_atomic_update(user_id, &|current| {
                if current < amount {
                    return Err(LedgerError::InsufficientFunds);
                }
                *previous.lock().unwrap() = current;
                Ok(current - amount)
            })
            .await?;
        let previous = *previous.lock().unwrap();

        self.after_mutation(previous, &updated, operation, transaction_id)
            .await;

        tracing::info!(
            user_id,
            amount = %amount,
            new_balance = %updated.amount,
            operation = operation.as_str(),
            "Balance debited"
        );
        Ok(updated)
    }

    pub async fn get_balance_history(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<BalanceHistory>, LedgerError> {
        self.repo.get_history(user_id, limit, offset).await
    }

    pub async fn get_history_by_date_range(
        &self,
        user_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BalanceHistory>, LedgerError> {
        self.repo.get_history_by_date_range(user_id, start, end).await
    }

    /// Success-path side effects. All best-effort: the mutation is already
    /// committed, failures here are logged and never undo it.
    async fn after_mutation(
        &self,
        previous: Decimal,
        updated: &Balance,
        operation: BalanceOperation,
        transaction_id: Option<TransactionId>,
    ) {
        if let Err(err) = self
            .repo
            .add_history(&NewBalanceHistory {
                user_id: updated.user_id,
                previous_amount: previous,
                new_amount: updated.amount,
                transaction_id,
                operation,
            })
            .await
        {
            tracing::error!(user_id = updated.user_id, error = %err, "Balance history write failed");
        }

        self.emit_event(updated).await;

        let delta = updated.amount - previous;
        let sign = if delta >= Decimal::ZERO { "+" } else { "" };
        self.emit_audit(
            updated.user_id,
            AuditAction::Update,
            format!("{}: {}{}", operation.as_str(), sign, delta),
        )
        .await;

        self.refresh_cache(updated).await;
    }

    async fn emit_event(&self, balance: &Balance) {
        let payload = match serde_json::to_value(balance) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!(user_id = balance.user_id, error = %err, "Balance event encode failed");
                return;
            }
        };

        if let Err(err) = self
            .events
            .append(
                AggregateType::Balance,
                &balance.user_id.to_string(),
                EventType::BalanceUpdated,
                payload,
            )
            .await
        {
            tracing::error!(user_id = balance.user_id, error = %err, "Balance event append failed");
        }
    }

    async fn emit_audit(&self, user_id: UserId, action: AuditAction, details: String) {
        if let Err(err) = self
            .audit
            .create(&NewAuditLog {
                entity_type: EntityType::Balance,
                entity_id: user_id,
                action,
                details,
            })
            .await
        {
            tracing::error!(user_id, error = %err, "Audit log write failed");
        }
    }

    /// Invalidate the user's balance keys, then repopulate the
    /// current-balance key with the fresh value.
    async fn refresh_cache(&self, balance: &Balance) {
        let Some(cache) = &self.cache else {
            return;
        };

        cache
            .invalidate(&keys::balance_invalidation_keys(balance.user_id))
            .await;

        match serde_json::to_vec(balance) {
            Ok(bytes) => {
                if let Err(err) = cache
                    .cache()
                    .set(&keys::balance_by_user(balance.user_id), &bytes, self.cache_ttl)
                    .await
                {
                    tracing::error!(user_id = balance.user_id, error = %err, "Balance cache repopulation failed");
                }
            }
            Err(err) => {
                tracing::error!(user_id = balance.user_id, error = %err, "Balance cache encode failed");
            }
        }
    }
}

/// Reject non-positive amounts and normalize to two fractional digits.
fn validate_amount(amount: Decimal) -> Result<Decimal, LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount);
    }
    Ok(amount.round_dp(2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Cache, MemoryCache};
    use crate::persistence::{
        MemoryAuditLogRepository, MemoryBalanceRepository, MemoryEventStoreRepository,
    };

    struct Fixture {
        service: BalanceService,
        balances: Arc<MemoryBalanceRepository>,
        audit: Arc<MemoryAuditLogRepository>,
        events: Arc<EventStoreService>,
        cache: Arc<MemoryCache>,
    }

    fn fixture() -> Fixture {
        let balances = Arc::new(MemoryBalanceRepository::new());
        let audit = Arc::new(MemoryAuditLogRepository::new());
        let events = Arc::new(EventStoreService::new(Arc::new(
            MemoryEventStoreRepository::new(),
        )));
        let cache = Arc::new(MemoryCache::new());
        let service = BalanceService::new(balances.clone(), audit.clone(), events.clone())
            .with_cache(
                CacheManager::new(cache.clone()),
                Duration::from_secs(60),
            );
        Fixture {
            service,
            balances,
            audit,
            events,
            cache,
        }
    }

    fn dec(value: i64) -> Decimal {
        Decimal::new(value, 2)
    }

    #[tokio::test]
    async fn test_initialize_twice_is_one_creation() {
        let f = fixture();
        f.service.initialize_balance(1).await.unwrap();
        f.service.initialize_balance(1).await.unwrap();

        let balance = f.service.get_balance(1).await.unwrap();
        assert_eq!(balance.amount, Decimal::ZERO);

        // A single balance_updated event at version 1.
        let events = f
            .events
            .get_events(AggregateType::Balance, "1")
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].version, 1);
    }

    #[tokio::test]
    async fn test_deposit_rejects_non_positive_amounts() {
        let f = fixture();
        f.service.initialize_balance(1).await.unwrap();

        let zero = f.service.deposit_atomically(1, Decimal::ZERO).await;
        assert!(matches!(zero, Err(LedgerError::InvalidAmount)));

        let negative = f.service.deposit_atomically(1, dec(-100)).await;
        assert!(matches!(negative, Err(LedgerError::InvalidAmount)));
    }

    #[tokio::test]
    async fn test_deposit_on_missing_balance() {
        let f = fixture();
        let result = f.service.deposit_atomically(42, dec(100)).await;
        assert!(matches!(result, Err(LedgerError::BalanceNotFound(42))));
    }

    #[tokio::test]
    async fn test_withdraw_exact_balance_leaves_zero() {
        let f = fixture();
        f.service.initialize_balance(1).await.unwrap();
        f.service.deposit_atomically(1, dec(5000)).await.unwrap();

        let balance = f.service.withdraw_atomically(1, dec(5000)).await.unwrap();
        assert_eq!(balance.amount, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_withdraw_one_minor_unit_over_rejects() {
        let f = fixture();
        f.service.initialize_balance(1).await.unwrap();
        f.service.deposit_atomically(1, dec(5000)).await.unwrap();

        let result = f.service.withdraw_atomically(1, dec(5001)).await;
        assert!(matches!(result, Err(LedgerError::InsufficientFunds)));

        let balance = f.balances.find_by_user_id(1).await.unwrap().unwrap();
        assert_eq!(balance.amount, dec(5000));
    }

    #[tokio::test]
    async fn test_history_recorded_on_every_mutation() {
        let f = fixture();
        f.service.initialize_balance(1).await.unwrap();
        f.service.deposit_atomically(1, dec(10000)).await.unwrap();
        f.service.withdraw_atomically(1, dec(2500)).await.unwrap();

        let history = f.service.get_balance_history(1, 10, 0).await.unwrap();
        assert_eq!(history.len(), 2);
        // Newest first.
        assert_eq!(history[0].operation, BalanceOperation::Withdraw);
        assert_eq!(history[0].previous_amount, dec(10000));
        assert_eq!(history[0].new_amount, dec(7500));
        assert_eq!(history[1].operation, BalanceOperation::Deposit);
        assert_eq!(history[1].previous_amount, Decimal::ZERO);
        assert_eq!(history[1].new_amount, dec(10000));
    }

    #[tokio::test]
    async fn test_events_are_dense_across_mutations() {
        let f = fixture();
        f.service.initialize_balance(1).await.unwrap();
        f.service.deposit_atomically(1, dec(100)).await.unwrap();
        f.service.deposit_atomically(1, dec(200)).await.unwrap();

        let events = f
            .events
            .get_events(AggregateType::Balance, "1")
            .await
            .unwrap();
        let versions: Vec<i64> = events.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_audit_failure_does_not_fail_mutation() {
        let f = fixture();
        f.service.initialize_balance(1).await.unwrap();

        f.audit.set_fail_writes(true);
        let balance = f.service.deposit_atomically(1, dec(100)).await.unwrap();
        assert_eq!(balance.amount, dec(100));
    }

    #[tokio::test]
    async fn test_mutation_repopulates_cache() {
        let f = fixture();
        f.service.initialize_balance(1).await.unwrap();
        f.service.deposit_atomically(1, dec(4200)).await.unwrap();

        let cached = f.cache.get("balance:user:1").await.unwrap().unwrap();
        let balance: Balance = serde_json::from_slice(&cached).unwrap();
        assert_eq!(balance.amount, dec(4200));
    }

    #[tokio::test]
    async fn test_concurrent_deposits_converge() {
        let f = fixture();
        f.service.initialize_balance(1).await.unwrap();

        let service = Arc::new(f.service);
        let mut handles = Vec::new();
        for _ in 0..20 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service.deposit_atomically(1, dec(1000)).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let balance = service.get_balance(1).await.unwrap();
        assert_eq!(balance.amount, dec(20000));
    }
}
