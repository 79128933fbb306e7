//! Core types used throughout the system
//!
//! These are fundamental type aliases used by all modules.
//! They provide semantic meaning and enable future type evolution.

/// User ID - globally unique, immutable after assignment.
///
/// Matches the `users.id` primary key in PostgreSQL (BIGSERIAL).
pub type UserId = i64;

/// Transaction ID - unique within the system
pub type TransactionId = i64;

/// Event version - strictly monotonic per aggregate, starting at 1
pub type Version = i64;
