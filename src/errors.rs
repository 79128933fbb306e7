//! Ledger error taxonomy
//!
//! The closed set of failures the core can surface. The gateway maps each
//! variant to a transport status; the core never formats transport errors.

use thiserror::Error;

use crate::core_types::{TransactionId, UserId};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("invalid amount: must be positive")]
    InvalidAmount,

    #[error("invalid transaction: {0}")]
    InvalidTransaction(&'static str),

    #[error("balance not found for user {0}")]
    BalanceNotFound(UserId),

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    #[error("user not found: {0}")]
    UserNotFound(UserId),

    #[error("concurrent modification detected for {aggregate_type}/{aggregate_id}")]
    ConcurrentModification {
        aggregate_type: &'static str,
        aggregate_id: String,
    },

    #[error("worker queue full, transaction rejected")]
    Overloaded,

    #[error("compensation failed for transaction {0}")]
    CompensationFailed(TransactionId),

    #[error("circuit breaker is open")]
    CircuitBreakerOpen,

    #[error("too many requests")]
    TooManyRequests,

    #[error("transaction {0} is not eligible for rollback")]
    NotEligibleForRollback(TransactionId),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("cache error: {0}")]
    Cache(String),
}

impl LedgerError {
    /// Stable category name, independent of the display message.
    pub fn category(&self) -> &'static str {
        match self {
            LedgerError::InvalidAmount => "invalid_amount",
            LedgerError::InvalidTransaction(_) => "invalid_transaction",
            LedgerError::BalanceNotFound(_) => "balance_not_found",
            LedgerError::InsufficientFunds => "insufficient_funds",
            LedgerError::TransactionNotFound(_) => "transaction_not_found",
            LedgerError::UserNotFound(_) => "user_not_found",
            LedgerError::ConcurrentModification { .. } => "concurrent_modification",
            LedgerError::Overloaded => "overloaded",
            LedgerError::CompensationFailed(_) => "compensation_failed",
            LedgerError::CircuitBreakerOpen => "circuit_breaker_open",
            LedgerError::TooManyRequests => "too_many_requests",
            LedgerError::NotEligibleForRollback(_) => "not_eligible_for_rollback",
            LedgerError::Storage(_) => "storage_error",
            LedgerError::Cache(_) => "cache_error",
        }
    }

    /// Domain outcomes are expected rejections (insufficient funds,
    /// validation), not infrastructure faults. They must never trip the
    /// circuit breaker or trigger retries.
    pub fn is_domain_rejection(&self) -> bool {
        matches!(
            self,
            LedgerError::InvalidAmount
                | LedgerError::InvalidTransaction(_)
                | LedgerError::InsufficientFunds
                | LedgerError::BalanceNotFound(_)
                | LedgerError::UserNotFound(_)
                | LedgerError::TransactionNotFound(_)
                | LedgerError::NotEligibleForRollback(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_is_stable() {
        assert_eq!(LedgerError::InsufficientFunds.category(), "insufficient_funds");
        assert_eq!(LedgerError::Overloaded.category(), "overloaded");
        assert_eq!(
            LedgerError::ConcurrentModification {
                aggregate_type: "balance",
                aggregate_id: "1".to_string(),
            }
            .category(),
            "concurrent_modification"
        );
    }

    #[test]
    fn test_domain_rejections_do_not_trip_breaker() {
        assert!(LedgerError::InsufficientFunds.is_domain_rejection());
        assert!(LedgerError::InvalidAmount.is_domain_rejection());
        assert!(!LedgerError::Storage(sqlx::Error::PoolClosed).is_domain_rejection());
        assert!(!LedgerError::CircuitBreakerOpen.is_domain_rejection());
    }
}
