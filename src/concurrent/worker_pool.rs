//! Worker pool
//!
//! Fixed consumers draining a bounded MPMC ring buffer. Submission is
//! non-blocking: a full queue refuses the transaction immediately, which is
//! the backpressure signal upstream must translate into a retryable
//! rejection. Processor errors are recorded and the worker moves on.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_queue::ArrayQueue;
use futures::future::BoxFuture;
use std::sync::Mutex;

use crate::concurrent::{Stats, StatsCollector};
use crate::models::Transaction;

/// How long the pool waits for workers to drain on stop.
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Idle sleep between polls when the queue is empty.
const IDLE_SLEEP: Duration = Duration::from_millis(10);

pub type TransactionProcessor =
    Arc<dyn Fn(Transaction) -> BoxFuture<'static, Result<(), crate::errors::LedgerError>> + Send + Sync>;

pub struct WorkerPool {
    num_workers: usize,
    queue: Arc<ArrayQueue<Transaction>>,
    processor: TransactionProcessor,
    stats: Arc<StatsCollector>,
    running: Arc<AtomicBool>,
    workers: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(num_workers: usize, queue_capacity: usize, processor: TransactionProcessor) -> Self {
        Self {
            num_workers,
            queue: Arc::new(ArrayQueue::new(queue_capacity)),
            processor,
            stats: Arc::new(StatsCollector::new()),
            running: Arc::new(AtomicBool::new(false)),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the consumers. Idempotent.
    pub fn start(&self) {
        let mut workers = self.workers.lock().unwrap();
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::info!(
            num_workers = self.num_workers,
            queue_capacity = self.queue.capacity(),
            "Starting worker pool"
        );

        for worker_id in 0..self.num_workers {
            let queue = self.queue.clone();
            let processor = self.processor.clone();
            let stats = self.stats.clone();
            let running = self.running.clone();

            workers.push(tokio::spawn(async move {
                tracing::debug!(worker_id, "Worker started");
                loop {
                    match queue.pop() {
                        Some(transaction) => {
                            let transaction_id = transaction.id;
                            let started_at = Instant::now();

                            let result = processor(transaction).await;
                            let elapsed = started_at.elapsed();

                            match result {
                                Ok(()) => {
                                    stats.increment_completed();
                                    stats.record_processing_time(elapsed);
                                    tracing::debug!(
                                        worker_id,
                                        transaction_id,
                                        elapsed_ms = elapsed.as_millis() as u64,
                                        "Transaction processed"
                                    );
                                }
                                Err(err) => {
                                    stats.increment_failed();
                                    tracing::error!(
                                        worker_id,
                                        transaction_id,
                                        error = %err,
                                        "Transaction processing failed"
                                    );
                                }
                            }
                        }
                        None => {
                            // Drain fully before honoring shutdown.
                            if !running.load(Ordering::SeqCst) {
                                tracing::debug!(worker_id, "Worker stopped");
                                return;
                            }
                            tokio::time::sleep(IDLE_SLEEP).await;
                        }
                    }
                }
            }));
        }
    }

    /// Non-blocking enqueue. Returns false when the pool is not running or
    /// the queue is full; a full queue counts as a rejection.
    pub fn submit(&self, transaction: Transaction) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }

        self.stats.increment_submitted();

        let transaction_id = transaction.id;
        match self.queue.push(transaction) {
            Ok(()) => {
                tracing::debug!(transaction_id, "Transaction enqueued");
                true
            }
            Err(_) => {
                self.stats.increment_rejected();
                tracing::warn!(transaction_id, "Worker queue full, transaction rejected");
                false
            }
        }
    }

    /// Stop accepting work, drain the queue, and join the workers within the
    /// grace period.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        tracing::info!("Stopping worker pool");

        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        let join_all = async {
            for worker in workers {
                let _ = worker.await;
            }
        };

        if tokio::time::timeout(STOP_GRACE_PERIOD, join_all).await.is_err() {
            tracing::error!(
                grace_secs = STOP_GRACE_PERIOD.as_secs(),
                "Worker pool did not drain within the grace period"
            );
        }
    }

    pub fn stats(&self) -> Stats {
        self.stats.stats()
    }

    pub fn queue_length(&self) -> usize {
        self.queue.len()
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TransactionStatus, TransactionType};
    use chrono::Utc;
    use rust_decimal::Decimal;
    use std::sync::atomic::AtomicU64;

    fn test_transaction(id: i64) -> Transaction {
        Transaction {
            id,
            from_user_id: None,
            to_user_id: Some(1),
            amount: Decimal::new(100, 2),
            tx_type: TransactionType::Deposit,
            status: TransactionStatus::Pending,
            description: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_submit_before_start_is_refused() {
        let pool = WorkerPool::new(1, 10, Arc::new(|_| Box::pin(async { Ok(()) })));
        assert!(!pool.submit(test_transaction(1)));
        assert_eq!(pool.stats().submitted, 0);
    }

    #[tokio::test]
    async fn test_processes_submitted_transactions() {
        let processed = Arc::new(AtomicU64::new(0));
        let counter = processed.clone();

        let pool = WorkerPool::new(
            3,
            100,
            Arc::new(move |_tx| {
                let counter = counter.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        );
        pool.start();

        for i in 0..20 {
            assert!(pool.submit(test_transaction(i)));
        }

        pool.stop().await;
        assert_eq!(processed.load(Ordering::SeqCst), 20);

        let stats = pool.stats();
        assert_eq!(stats.submitted, 20);
        assert_eq!(stats.completed, 20);
        assert_eq!(stats.failed, 0);
        assert_eq!(pool.queue_length(), 0);
    }

    #[tokio::test]
    async fn test_processor_error_counts_failed_and_worker_continues() {
        let pool = WorkerPool::new(
            1,
            10,
            Arc::new(|tx| {
                Box::pin(async move {
                    if tx.id % 2 == 0 {
                        Err(crate::errors::LedgerError::InsufficientFunds)
                    } else {
                        Ok(())
                    }
                })
            }),
        );
        pool.start();

        for i in 0..10 {
            assert!(pool.submit(test_transaction(i)));
        }
        pool.stop().await;

        let stats = pool.stats();
        assert_eq!(stats.completed, 5);
        assert_eq!(stats.failed, 5);
    }

    #[tokio::test]
    async fn test_full_queue_rejects_the_overflow() {
        // Block the single worker so queued items cannot drain.
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let gate_worker = gate.clone();

        let capacity = 5;
        let pool = WorkerPool::new(
            1,
            capacity,
            Arc::new(move |_tx| {
                let gate = gate_worker.clone();
                Box::pin(async move {
                    let _permit = gate.acquire().await.unwrap();
                    Ok(())
                })
            }),
        );
        pool.start();

        // First submission is pulled in-flight by the worker.
        assert!(pool.submit(test_transaction(0)));
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Fill the queue to capacity, then one more must be rejected.
        for i in 1..=capacity as i64 {
            assert!(pool.submit(test_transaction(i)), "submission {} should fit", i);
        }
        assert!(!pool.submit(test_transaction(99)));

        let stats = pool.stats();
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.submitted, capacity as u64 + 2);
        assert_eq!(pool.queue_length(), capacity);

        gate.add_permits(100);
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_stop_drains_queued_work() {
        let processed = Arc::new(AtomicU64::new(0));
        let counter = processed.clone();

        let pool = WorkerPool::new(
            2,
            100,
            Arc::new(move |_tx| {
                let counter = counter.clone();
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        );
        pool.start();

        for i in 0..50 {
            assert!(pool.submit(test_transaction(i)));
        }
        pool.stop().await;

        assert_eq!(processed.load(Ordering::SeqCst), 50);
        assert_eq!(pool.queue_length(), 0);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let pool = WorkerPool::new(2, 10, Arc::new(|_| Box::pin(async { Ok(()) })));
        pool.start();
        pool.start();
        assert_eq!(pool.workers.lock().unwrap().len(), 2);
        pool.stop().await;
    }
}
