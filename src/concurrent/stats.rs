//! Worker pool statistics
//!
//! Counters are lock-free atomics; the processing-time mean uses a small
//! mutex-protected accumulator because two fields must move together.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub rejected: u64,
    pub avg_process_time: Duration,
}

#[derive(Default)]
struct TimeAccumulator {
    total_nanos: u128,
    count: u64,
}

#[derive(Default)]
pub struct StatsCollector {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    processing_time: Mutex<TimeAccumulator>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processing_time(&self, duration: Duration) {
        let mut acc = self.processing_time.lock().unwrap();
        acc.total_nanos += duration.as_nanos();
        acc.count += 1;
    }

    pub fn stats(&self) -> Stats {
        let avg_process_time = {
            let acc = self.processing_time.lock().unwrap();
            if acc.count > 0 {
                Duration::from_nanos((acc.total_nanos / acc.count as u128) as u64)
            } else {
                Duration::ZERO
            }
        };

        Stats {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            avg_process_time,
        }
    }

    pub fn reset(&self) {
        self.submitted.store(0, Ordering::Relaxed);
        self.completed.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.rejected.store(0, Ordering::Relaxed);

        let mut acc = self.processing_time.lock().unwrap();
        acc.total_nanos = 0;
        acc.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let collector = StatsCollector::new();
        collector.increment_submitted();
        collector.increment_submitted();
        collector.increment_completed();
        collector.increment_failed();
        collector.increment_rejected();

        let stats = collector.stats();
        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.rejected, 1);
    }

    #[test]
    fn test_avg_process_time_is_running_mean() {
        let collector = StatsCollector::new();
        assert_eq!(collector.stats().avg_process_time, Duration::ZERO);

        collector.record_processing_time(Duration::from_millis(10));
        collector.record_processing_time(Duration::from_millis(30));

        assert_eq!(collector.stats().avg_process_time, Duration::from_millis(20));
    }

    #[test]
    fn test_reset() {
        let collector = StatsCollector::new();
        collector.increment_submitted();
        collector.record_processing_time(Duration::from_millis(5));

        collector.reset();
        let stats = collector.stats();
        assert_eq!(stats.submitted, 0);
        assert_eq!(stats.avg_process_time, Duration::ZERO);
    }
}
