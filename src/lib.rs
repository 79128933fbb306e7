//! PayFlow - Transactional Ledger Service
//!
//! Maintains per-user monetary balances under concurrent deposits,
//! withdrawals, and transfers with non-negative balance invariants, durable
//! history, and auditable causality.
//!
//! # Modules
//!
//! - [`core_types`] - Id type aliases
//! - [`models`] - Domain types (User, Balance, Transaction, Event, ...)
//! - [`errors`] - Closed failure taxonomy
//! - [`balance`] - Balance mutation kernel (the only balance writer)
//! - [`engine`] - Transaction engine (validation, worker dispatch, rollback)
//! - [`concurrent`] - Worker pool and stats collector
//! - [`events`] - Event store service and replay engine
//! - [`resilience`] - Circuit breaker and fallback manager
//! - [`cache`] - Cache plane (trait, in-process impl, access strategies)
//! - [`persistence`] - Repository traits + PostgreSQL / in-memory impls
//! - [`db`] - Connection pooling and master/replica routing
//! - [`gateway`] - Thin HTTP adapter

// Core types - must be first!
pub mod core_types;

// Configuration and observability
pub mod config;
pub mod logging;

// Domain
pub mod errors;
pub mod models;

// Ledger components
pub mod audit;
pub mod balance;
pub mod cache;
pub mod concurrent;
pub mod db;
pub mod engine;
pub mod events;
pub mod persistence;
pub mod resilience;
pub mod users;

// External adapter
pub mod gateway;

// Convenient re-exports at crate root
pub use balance::BalanceService;
pub use concurrent::WorkerPool;
pub use core_types::{TransactionId, UserId, Version};
pub use engine::TransactionEngine;
pub use errors::LedgerError;
pub use events::{EventStoreService, ReplayEngine};
pub use models::{Balance, Transaction, TransactionStatus, TransactionType, User};
pub use resilience::{CircuitBreaker, FallbackManager};
