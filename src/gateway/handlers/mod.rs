//! Request handlers, grouped by resource

pub mod audit;
pub mod balances;
pub mod health;
pub mod transactions;
pub mod users;
