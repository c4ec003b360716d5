//! Execution metrics
//!
//! Lock-free counters recording how tasks were routed and how they ended.
//! One instance is owned by each engine; there is no process-wide registry.

use crate::classify::Strategy;
use crate::core::errors::ThreaderError;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Task execution metrics
#[derive(Debug, Default)]
pub struct ExecutionMetrics {
    /// Total number of tasks submitted
    pub tasks_submitted: AtomicU64,
    /// Tasks that produced a value
    pub tasks_completed: AtomicU64,
    /// Tasks that produced an error of any kind
    pub tasks_failed: AtomicU64,
    /// Settled tasks per strategy
    pub recognized_executions: AtomicU64,
    pub accelerated_executions: AtomicU64,
    pub isolated_executions: AtomicU64,
    /// Gateway errors that were retried on a worker
    pub acceleration_fallbacks: AtomicU64,
    /// Re-dispatches after a recoverable failure
    pub retries: AtomicU64,
    pub timeouts: AtomicU64,
    pub context_failures: AtomicU64,
    /// Failures observed on detached (fire) tasks
    pub detached_failures: AtomicU64,
    /// Total execution time across all settled tasks
    pub total_execution_time_ms: AtomicU64,
}

impl ExecutionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submitted(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a settled task and the strategy that produced its outcome
    pub fn record_settled<T>(
        &self,
        strategy: Strategy,
        outcome: &Result<T, ThreaderError>,
        elapsed: Duration,
    ) {
        let counter = match strategy {
            Strategy::Recognized => &self.recognized_executions,
            Strategy::Accelerated => &self.accelerated_executions,
            Strategy::Isolated => &self.isolated_executions,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.total_execution_time_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);

        match outcome {
            Ok(_) => {
                self.tasks_completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.tasks_failed.fetch_add(1, Ordering::Relaxed);
                match e {
                    ThreaderError::Timeout { .. } => {
                        self.timeouts.fetch_add(1, Ordering::Relaxed);
                    }
                    ThreaderError::ContextFailure { .. } => {
                        self.context_failures.fetch_add(1, Ordering::Relaxed);
                    }
                    _ => {}
                }
            }
        }
    }

    pub fn record_fallback(&self) {
        self.acceleration_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_detached_failure(&self) {
        self.detached_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of tasks that reached an outcome through any strategy
    pub fn total_executions(&self) -> u64 {
        self.tasks_completed.load(Ordering::Relaxed) + self.tasks_failed.load(Ordering::Relaxed)
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            recognized_executions: self.recognized_executions.load(Ordering::Relaxed),
            accelerated_executions: self.accelerated_executions.load(Ordering::Relaxed),
            isolated_executions: self.isolated_executions.load(Ordering::Relaxed),
            acceleration_fallbacks: self.acceleration_fallbacks.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            context_failures: self.context_failures.load(Ordering::Relaxed),
            detached_failures: self.detached_failures.load(Ordering::Relaxed),
            total_execution_time_ms: self.total_execution_time_ms.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub tasks_submitted: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub recognized_executions: u64,
    pub accelerated_executions: u64,
    pub isolated_executions: u64,
    pub acceleration_fallbacks: u64,
    pub retries: u64,
    pub timeouts: u64,
    pub context_failures: u64,
    pub detached_failures: u64,
    pub total_execution_time_ms: u64,
}

impl MetricsSnapshot {
    /// Calculate success rate over settled tasks (0.0 to 1.0)
    pub fn success_rate(&self) -> f64 {
        let settled = self.tasks_completed + self.tasks_failed;
        if settled == 0 {
            0.0
        } else {
            self.tasks_completed as f64 / settled as f64
        }
    }

    /// Average execution time per settled task
    pub fn avg_execution_time_ms(&self) -> u64 {
        let settled = self.tasks_completed + self.tasks_failed;
        if settled == 0 {
            0
        } else {
            self.total_execution_time_ms / settled
        }
    }
}

/// Timer for measuring execution duration
pub struct ExecutionTimer {
    start: Instant,
}

impl ExecutionTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Elapsed milliseconds, saturating
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis().min(u64::MAX as u128) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_metrics_basic() {
        let metrics = ExecutionMetrics::new();

        metrics.record_submitted();
        metrics.record_submitted();
        metrics.record_settled::<()>(Strategy::Recognized, &Ok(()), Duration::from_millis(4));
        metrics.record_settled::<()>(
            Strategy::Isolated,
            &Err(ThreaderError::timeout(2, 100)),
            Duration::from_millis(100),
        );

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.tasks_submitted, 2);
        assert_eq!(snapshot.tasks_completed, 1);
        assert_eq!(snapshot.tasks_failed, 1);
        assert_eq!(snapshot.recognized_executions, 1);
        assert_eq!(snapshot.isolated_executions, 1);
        assert_eq!(snapshot.timeouts, 1);
        assert_eq!(snapshot.success_rate(), 0.5);
        assert_eq!(snapshot.avg_execution_time_ms(), 52);
        assert_eq!(metrics.total_executions(), 2);
    }

    #[test]
    fn test_execution_timer() {
        let timer = ExecutionTimer::start();
        thread::sleep(Duration::from_millis(10));

        assert!(timer.elapsed() >= Duration::from_millis(10));
        assert!(timer.elapsed_ms() >= 10);
    }
}
