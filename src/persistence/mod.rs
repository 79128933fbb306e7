//! Persistence layer
//!
//! Repository traits consumed by the services, with PostgreSQL
//! implementations (runtime sqlx queries, no compile-time DB connection) and
//! in-memory implementations used by tests.

pub mod audit;
pub mod balances;
pub mod event_store;
pub mod memory;
pub mod schema;
pub mod transactions;
pub mod users;

pub use audit::{AuditLogRepository, NewAuditLog, PgAuditLogRepository};
pub use memory::{
    MemoryAuditLogRepository, MemoryBalanceRepository, MemoryEventStoreRepository,
    MemoryTransactionRepository, MemoryUserRepository,
};
pub use balances::{BalanceRepository, NewBalanceHistory, PgBalanceRepository};
pub use event_store::{EventStoreRepository, NewEvent, PgEventStoreRepository};
pub use transactions::{NewTransaction, PgTransactionRepository, TransactionRepository};
pub use users::{NewUser, PgUserRepository, UserRepository};
