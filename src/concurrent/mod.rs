//! Concurrent task execution
//!
//! - [`WorkerPool`] - fixed consumers over a bounded queue with non-blocking
//!   submission
//! - [`StatsCollector`] - atomic counters and a running processing-time mean

pub mod stats;
pub mod worker_pool;

pub use stats::{Stats, StatsCollector};
pub use worker_pool::{TransactionProcessor, WorkerPool};
