//! In-memory repository implementations
//!
//! Drop-in stand-ins for the PostgreSQL repositories, used by unit and
//! scenario tests. Mutations serialize through a single mutex per
//! repository, which satisfies the same row-level exclusion contract the
//! `FOR UPDATE` path provides. The balance repository supports targeted
//! failure injection so compensation paths can be exercised.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::core_types::{TransactionId, UserId, Version};
use crate::errors::LedgerError;
use crate::models::{
    AggregateType, AuditLog, Balance, BalanceHistory, EntityType, Event, EventType, Transaction,
    TransactionStatus, User,
};

use super::balances::{ApplyFn, BalanceRepository, NewBalanceHistory};
use super::event_store::{EventStoreRepository, NewEvent};
use super::transactions::{NewTransaction, TransactionRepository};
use super::users::{NewUser, UserRepository};
use super::{AuditLogRepository, NewAuditLog};

fn storage_unavailable() -> LedgerError {
    LedgerError::Storage(sqlx::Error::PoolClosed)
}

// ---------------------------------------------------------------------------
// Balances
// ---------------------------------------------------------------------------

#[derive(Default)]
struct BalanceState {
    balances: HashMap<UserId, Balance>,
    history: Vec<BalanceHistory>,
}

#[derive(Default)]
pub struct MemoryBalanceRepository {
    state: Mutex<BalanceState>,
    /// user -> number of further updates allowed before failing.
    failing_users: Mutex<HashMap<UserId, u32>>,
    next_history_id: AtomicI64,
}

impl MemoryBalanceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every subsequent `atomic_update` for `user_id` fails with a storage
    /// error until cleared.
    pub fn fail_updates_for(&self, user_id: UserId) {
        self.failing_users.lock().unwrap().insert(user_id, 0);
    }

    /// Allow `successes` more updates for `user_id`, then fail the rest.
    pub fn fail_updates_after(&self, user_id: UserId, successes: u32) {
        self.failing_users.lock().unwrap().insert(user_id, successes);
    }

    pub fn clear_failures(&self) {
        self.failing_users.lock().unwrap().clear();
    }

    pub fn history_snapshot(&self) -> Vec<BalanceHistory> {
        self.state.lock().unwrap().history.clone()
    }
}

#[async_trait]
impl BalanceRepository for MemoryBalanceRepository {
    async fn find_by_user_id(&self, user_id: UserId) -> Result<Option<Balance>, LedgerError> {
        Ok(self.state.lock().unwrap().balances.get(&user_id).cloned())
    }

    async fn initialize(&self, user_id: UserId) -> Result<bool, LedgerError> {
        let mut state = self.state.lock().unwrap();
        if state.balances.contains_key(&user_id) {
            return Ok(false);
        }
        state.balances.insert(
            user_id,
            Balance {
                user_id,
                amount: Decimal::ZERO,
                last_updated_at: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn upsert(&self, balance: &Balance) -> Result<Balance, LedgerError> {
        let mut state = self.state.lock().unwrap();
        let stored = Balance {
            user_id: balance.user_id,
            amount: balance.amount,
            last_updated_at: Utc::now(),
        };
        state.balances.insert(balance.user_id, stored.clone());
        Ok(stored)
    }

    async fn atomic_update(
        &self,
        user_id: UserId,
        apply: ApplyFn<'_>,
    ) -> Result<Balance, LedgerError> {
        if let Some(remaining) = self.failing_users.lock().unwrap().get_mut(&user_id) {
            if *remaining == 0 {
                return Err(storage_unavailable());
            }
            *remaining -= 1;
        }

        let mut state = self.state.lock().unwrap();
        let current = state
            .balances
            .get(&user_id)
            .ok_or(LedgerError::BalanceNotFound(user_id))?
            .amount;

        let new_amount = apply(current)?;

        let updated = Balance {
            user_id,
            amount: new_amount,
            last_updated_at: Utc::now(),
        };
        state.balances.insert(user_id, updated.clone());
        Ok(updated)
    }

    async fn add_history(&self, entry: &NewBalanceHistory) -> Result<(), LedgerError> {
        let id = self.next_history_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.lock().unwrap().history.push(BalanceHistory {
            id,
            user_id: entry.user_id,
            previous_amount: entry.previous_amount,
            new_amount: entry.new_amount,
            transaction_id: entry.transaction_id,
            operation: entry.operation,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn get_history(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<BalanceHistory>, LedgerError> {
        let state = self.state.lock().unwrap();
        let mut rows: Vec<BalanceHistory> = state
            .history
            .iter()
            .filter(|h| h.user_id == user_id)
            .cloned()
            .collect();
        rows.reverse();
        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn get_history_by_date_range(
        &self,
        user_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BalanceHistory>, LedgerError> {
        let state = self.state.lock().unwrap();
        let mut rows: Vec<BalanceHistory> = state
            .history
            .iter()
            .filter(|h| h.user_id == user_id && h.created_at >= start && h.created_at <= end)
            .cloned()
            .collect();
        rows.reverse();
        Ok(rows)
    }
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryTransactionRepository {
    transactions: Mutex<HashMap<TransactionId, Transaction>>,
    next_id: AtomicI64,
}

impl MemoryTransactionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backdate a transaction's creation time; used to exercise the
    /// rollback eligibility window.
    pub fn backdate(&self, id: TransactionId, created_at: DateTime<Utc>) {
        if let Some(tx) = self.transactions.lock().unwrap().get_mut(&id) {
            tx.created_at = created_at;
        }
    }
}

#[async_trait]
impl TransactionRepository for MemoryTransactionRepository {
    async fn create(&self, tx: &NewTransaction) -> Result<Transaction, LedgerError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let transaction = Transaction {
            id,
            from_user_id: tx.from_user_id,
            to_user_id: tx.to_user_id,
            amount: tx.amount,
            tx_type: tx.tx_type,
            status: TransactionStatus::Pending,
            description: tx.description.clone(),
            created_at: Utc::now(),
        };
        self.transactions
            .lock()
            .unwrap()
            .insert(id, transaction.clone());
        Ok(transaction)
    }

    async fn find_by_id(&self, id: TransactionId) -> Result<Option<Transaction>, LedgerError> {
        Ok(self.transactions.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Transaction>, LedgerError> {
        let transactions = self.transactions.lock().unwrap();
        let mut rows: Vec<Transaction> = transactions
            .values()
            .filter(|t| t.from_user_id == Some(user_id) || t.to_user_id == Some(user_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Transaction>, LedgerError> {
        let transactions = self.transactions.lock().unwrap();
        let mut rows: Vec<Transaction> = transactions.values().cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn update_status(
        &self,
        id: TransactionId,
        status: TransactionStatus,
    ) -> Result<(), LedgerError> {
        let mut transactions = self.transactions.lock().unwrap();
        match transactions.get_mut(&id) {
            Some(tx) => {
                tx.status = status;
                Ok(())
            }
            None => Err(LedgerError::TransactionNotFound(id)),
        }
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryUserRepository {
    users: Mutex<HashMap<UserId, User>>,
    next_id: AtomicI64,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn create(&self, user: &NewUser) -> Result<User, LedgerError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let stored = User {
            id,
            username: user.username.clone(),
            email: user.email.clone(),
            password_hash: user.password_hash.clone(),
            role: user.role,
            api_key: Some(user.api_key.clone()),
            created_at: now,
            updated_at: now,
        };
        self.users.lock().unwrap().insert(id, stored.clone());
        Ok(stored)
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, LedgerError> {
        Ok(self.users.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, LedgerError> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn find_by_api_key(&self, api_key: &str) -> Result<Option<User>, LedgerError> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.api_key.as_deref() == Some(api_key))
            .cloned())
    }

    async fn update(&self, user: &User) -> Result<(), LedgerError> {
        let mut users = self.users.lock().unwrap();
        match users.get_mut(&user.id) {
            Some(stored) => {
                stored.username = user.username.clone();
                stored.email = user.email.clone();
                stored.password_hash = user.password_hash.clone();
                stored.role = user.role;
                stored.updated_at = Utc::now();
                Ok(())
            }
            None => Err(LedgerError::UserNotFound(user.id)),
        }
    }

    async fn set_api_key(&self, id: UserId, api_key: &str) -> Result<(), LedgerError> {
        let mut users = self.users.lock().unwrap();
        match users.get_mut(&id) {
            Some(stored) => {
                stored.api_key = Some(api_key.to_string());
                stored.updated_at = Utc::now();
                Ok(())
            }
            None => Err(LedgerError::UserNotFound(id)),
        }
    }

    async fn delete(&self, id: UserId) -> Result<(), LedgerError> {
        match self.users.lock().unwrap().remove(&id) {
            Some(_) => Ok(()),
            None => Err(LedgerError::UserNotFound(id)),
        }
    }
}

// ---------------------------------------------------------------------------
// Audit logs
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryAuditLogRepository {
    logs: Mutex<Vec<AuditLog>>,
    next_id: AtomicI64,
    fail_writes: AtomicBool,
}

impl MemoryAuditLogRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail; audit writes are best-effort so the
    /// business operation must still succeed.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> Vec<AuditLog> {
        self.logs.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditLogRepository for MemoryAuditLogRepository {
    async fn create(&self, entry: &NewAuditLog) -> Result<(), LedgerError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(storage_unavailable());
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.logs.lock().unwrap().push(AuditLog {
            id,
            entity_type: entry.entity_type,
            entity_id: entry.entity_id,
            action: entry.action,
            details: entry.details.clone(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<AuditLog>, LedgerError> {
        let logs = self.logs.lock().unwrap();
        let mut rows: Vec<AuditLog> = logs.iter().rev().cloned().collect();
        rows = rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok(rows)
    }

    async fn list_by_entity(
        &self,
        entity_type: EntityType,
        entity_id: i64,
    ) -> Result<Vec<AuditLog>, LedgerError> {
        let logs = self.logs.lock().unwrap();
        Ok(logs
            .iter()
            .rev()
            .filter(|l| l.entity_type == entity_type && l.entity_id == entity_id)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Event store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryEventStoreRepository {
    events: Mutex<Vec<Event>>,
    next_id: AtomicI64,
}

impl MemoryEventStoreRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStoreRepository for MemoryEventStoreRepository {
    async fn save(&self, event: &NewEvent) -> Result<Event, LedgerError> {
        let mut events = self.events.lock().unwrap();

        let taken = events.iter().any(|e| {
            e.aggregate_type == event.aggregate_type
                && e.aggregate_id == event.aggregate_id
                && e.version == event.version
        });
        if taken {
            return Err(LedgerError::ConcurrentModification {
                aggregate_type: event.aggregate_type.as_str(),
                aggregate_id: event.aggregate_id.clone(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let stored = Event {
            id,
            aggregate_type: event.aggregate_type,
            aggregate_id: event.aggregate_id.clone(),
            event_type: event.event_type,
            event_data: event.event_data.clone(),
            version: event.version,
            created_at: Utc::now(),
            metadata: event.metadata.clone(),
        };
        events.push(stored.clone());
        Ok(stored)
    }

    async fn get_events(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: &str,
    ) -> Result<Vec<Event>, LedgerError> {
        let events = self.events.lock().unwrap();
        let mut rows: Vec<Event> = events
            .iter()
            .filter(|e| e.aggregate_type == aggregate_type && e.aggregate_id == aggregate_id)
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.version);
        Ok(rows)
    }

    async fn get_events_by_type(&self, event_type: EventType) -> Result<Vec<Event>, LedgerError> {
        let events = self.events.lock().unwrap();
        Ok(events
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect())
    }

    async fn get_events_by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>, LedgerError> {
        let events = self.events.lock().unwrap();
        Ok(events
            .iter()
            .filter(|e| e.created_at >= start && e.created_at <= end)
            .cloned()
            .collect())
    }

    async fn get_last_version(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: &str,
    ) -> Result<Version, LedgerError> {
        let events = self.events.lock().unwrap();
        Ok(events
            .iter()
            .filter(|e| e.aggregate_type == aggregate_type && e.aggregate_id == aggregate_id)
            .map(|e| e.version)
            .max()
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_store_rejects_stale_version() {
        let store = MemoryEventStoreRepository::new();
        let event = NewEvent {
            aggregate_type: AggregateType::Balance,
            aggregate_id: "1".to_string(),
            event_type: EventType::BalanceUpdated,
            event_data: serde_json::json!({"amount": "10.00"}),
            version: 1,
            metadata: None,
        };

        store.save(&event).await.unwrap();
        let stale = store.save(&event).await;
        assert!(matches!(
            stale,
            Err(LedgerError::ConcurrentModification { .. })
        ));
        assert_eq!(
            store
                .get_last_version(AggregateType::Balance, "1")
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_atomic_update_serializes_mutations() {
        use std::sync::Arc;

        let repo = Arc::new(MemoryBalanceRepository::new());
        repo.initialize(1).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.atomic_update(1, &|current| Ok(current + Decimal::new(100, 2)))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let balance = repo.find_by_user_id(1).await.unwrap().unwrap();
        assert_eq!(balance.amount, Decimal::new(5000, 2));
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let repo = MemoryBalanceRepository::new();
        repo.initialize(2).await.unwrap();
        repo.fail_updates_for(2);

        let result = repo.atomic_update(2, &|c| Ok(c)).await;
        assert!(matches!(result, Err(LedgerError::Storage(_))));

        repo.clear_failures();
        assert!(repo.atomic_update(2, &|c| Ok(c)).await.is_ok());
    }
}
