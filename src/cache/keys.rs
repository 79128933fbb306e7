//! Cache key layout
//!
//! Every cached entity has a stable key shape so invalidation can cascade by
//! prefix when an owning entity changes.

use crate::core_types::{TransactionId, UserId};

pub fn user_by_id(user_id: UserId) -> String {
    format!("user:id:{}", user_id)
}

pub fn user_by_username(username: &str) -> String {
    format!("user:username:{}", username)
}

pub fn user_by_email(email: &str) -> String {
    format!("user:email:{}", email)
}

pub fn balance_by_user(user_id: UserId) -> String {
    format!("balance:user:{}", user_id)
}

pub fn balance_history_by_user(user_id: UserId) -> String {
    format!("balance:history:user:{}", user_id)
}

pub fn transaction_by_id(transaction_id: TransactionId) -> String {
    format!("transaction:id:{}", transaction_id)
}

pub fn transactions_by_user(user_id: UserId) -> String {
    format!("transaction:user:{}", user_id)
}

pub fn transaction_stats_by_user(user_id: UserId) -> String {
    format!("transaction:stats:user:{}", user_id)
}

/// Keys invalidated when a balance mutates.
pub fn balance_invalidation_keys(user_id: UserId) -> Vec<String> {
    vec![
        balance_by_user(user_id),
        balance_history_by_user(user_id),
        transaction_stats_by_user(user_id),
    ]
}

/// Keys invalidated when a user is deleted: everything owned by or derived
/// from the user.
pub fn user_invalidation_keys(user_id: UserId, username: &str, email: &str) -> Vec<String> {
    vec![
        user_by_id(user_id),
        user_by_username(username),
        user_by_email(email),
        balance_by_user(user_id),
        balance_history_by_user(user_id),
        transactions_by_user(user_id),
        transaction_stats_by_user(user_id),
    ]
}
