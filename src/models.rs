//! Domain models
//!
//! Plain data types shared across the ledger core. Relations are expressed as
//! plain identifiers (no object graphs): a history row points at its
//! transaction by id, a transaction points at users by id.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core_types::{TransactionId, UserId, Version};

/// Account role, gates admin-only operations at the adapter layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Role::Admin),
            "user" => Some(Role::User),
            _ => None,
        }
    }
}

/// Registered account. `api_key` is the opaque credential the gateway
/// resolves callers by.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub api_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-user balance row. `amount >= 0` after any successful mutation;
/// the kernel is the only writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub user_id: UserId,
    pub amount: Decimal,
    pub last_updated_at: DateTime<Utc>,
}

/// Operation recorded in the balance history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceOperation {
    Deposit,
    Withdraw,
    TransferOut,
    TransferIn,
}

impl BalanceOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            BalanceOperation::Deposit => "deposit",
            BalanceOperation::Withdraw => "withdraw",
            BalanceOperation::TransferOut => "transfer_out",
            BalanceOperation::TransferIn => "transfer_in",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "deposit" => Some(BalanceOperation::Deposit),
            "withdraw" => Some(BalanceOperation::Withdraw),
            "transfer_out" => Some(BalanceOperation::TransferOut),
            "transfer_in" => Some(BalanceOperation::TransferIn),
            _ => None,
        }
    }
}

/// Append-only record of one balance mutation.
///
/// `transaction_id` is absent for direct updates (e.g. initialization).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceHistory {
    pub id: i64,
    pub user_id: UserId,
    pub previous_amount: Decimal,
    pub new_amount: Decimal,
    pub transaction_id: Option<TransactionId>,
    pub operation: BalanceOperation,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Deposit,
    Withdraw,
    Transfer,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdraw => "withdraw",
            TransactionType::Transfer => "transfer",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "deposit" => Some(TransactionType::Deposit),
            "withdraw" => Some(TransactionType::Withdraw),
            "transfer" => Some(TransactionType::Transfer),
            _ => None,
        }
    }
}

/// Lifecycle of a transaction.
///
/// `pending -> completed | failed`, exactly once; `completed -> rolled_back`
/// is allowed within 24h of creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    RolledBack,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::RolledBack => "rolled_back",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TransactionStatus::Pending),
            "completed" => Some(TransactionStatus::Completed),
            "failed" => Some(TransactionStatus::Failed),
            "rolled_back" => Some(TransactionStatus::RolledBack),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

/// A money movement.
///
/// Shape invariants by type: deposit has `to_user_id` only; withdraw has
/// `from_user_id` only; transfer has both and `from != to`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub from_user_id: Option<UserId>,
    pub to_user_id: Option<UserId>,
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    pub status: TransactionStatus,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Check the per-type participant shape.
    pub fn shape_is_valid(&self) -> bool {
        match self.tx_type {
            TransactionType::Deposit => self.from_user_id.is_none() && self.to_user_id.is_some(),
            TransactionType::Withdraw => self.from_user_id.is_some() && self.to_user_id.is_none(),
            TransactionType::Transfer => match (self.from_user_id, self.to_user_id) {
                (Some(from), Some(to)) => from != to,
                _ => false,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    User,
    Balance,
    Transaction,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::User => "user",
            EntityType::Balance => "balance",
            EntityType::Transaction => "transaction",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(EntityType::User),
            "balance" => Some(EntityType::Balance),
            "transaction" => Some(EntityType::Transaction),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Rollback,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::Rollback => "rollback",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "create" => Some(AuditAction::Create),
            "update" => Some(AuditAction::Update),
            "delete" => Some(AuditAction::Delete),
            "rollback" => Some(AuditAction::Rollback),
            _ => None,
        }
    }
}

/// Best-effort audit trail entry. Failure to write one never fails the
/// business operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: i64,
    pub entity_type: EntityType,
    pub entity_id: i64,
    pub action: AuditAction,
    pub details: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateType {
    Balance,
    Transaction,
}

impl AggregateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateType::Balance => "balance",
            AggregateType::Transaction => "transaction",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "balance" => Some(AggregateType::Balance),
            "transaction" => Some(AggregateType::Transaction),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    BalanceUpdated,
    TransactionCreated,
    TransactionCompleted,
    TransactionFailed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::BalanceUpdated => "balance_updated",
            EventType::TransactionCreated => "transaction_created",
            EventType::TransactionCompleted => "transaction_completed",
            EventType::TransactionFailed => "transaction_failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "balance_updated" => Some(EventType::BalanceUpdated),
            "transaction_created" => Some(EventType::TransactionCreated),
            "transaction_completed" => Some(EventType::TransactionCompleted),
            "transaction_failed" => Some(EventType::TransactionFailed),
            _ => None,
        }
    }
}

/// One entry in the append-only event store.
///
/// `(aggregate_type, aggregate_id, version)` is globally unique; versions are
/// dense per partition. `event_data` is opaque to the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub aggregate_type: AggregateType,
    pub aggregate_id: String,
    pub event_type: EventType,
    pub event_data: serde_json::Value,
    pub version: Version,
    pub created_at: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}

/// Worker pool statistics snapshot exposed to operators.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransactionStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub rejected: u64,
    pub avg_process_time_nanos: u64,
    pub queue_length: usize,
    pub queue_capacity: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            TransactionStatus::Pending,
            TransactionStatus::Completed,
            TransactionStatus::Failed,
            TransactionStatus::RolledBack,
        ] {
            assert_eq!(TransactionStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(TransactionStatus::from_str("bogus"), None);
    }

    #[test]
    fn test_operation_roundtrip() {
        for op in [
            BalanceOperation::Deposit,
            BalanceOperation::Withdraw,
            BalanceOperation::TransferOut,
            BalanceOperation::TransferIn,
        ] {
            assert_eq!(BalanceOperation::from_str(op.as_str()), Some(op));
        }
    }

    #[test]
    fn test_transaction_shape() {
        let now = Utc::now();
        let deposit = Transaction {
            id: 1,
            from_user_id: None,
            to_user_id: Some(10),
            amount: Decimal::new(10000, 2),
            tx_type: TransactionType::Deposit,
            status: TransactionStatus::Pending,
            description: None,
            created_at: now,
        };
        assert!(deposit.shape_is_valid());

        let self_transfer = Transaction {
            id: 2,
            from_user_id: Some(10),
            to_user_id: Some(10),
            amount: Decimal::new(500, 2),
            tx_type: TransactionType::Transfer,
            status: TransactionStatus::Pending,
            description: None,
            created_at: now,
        };
        assert!(!self_transfer.shape_is_valid());
    }

    #[test]
    fn test_terminal_status() {
        assert!(!TransactionStatus::Pending.is_terminal());
        assert!(TransactionStatus::Completed.is_terminal());
        assert!(TransactionStatus::RolledBack.is_terminal());
    }
}
