//! Worker pool manager
//!
//! `WorkerPool` is a cheap, cloneable handle. Submitting a task classifies it
//! and spawns a driver that runs it inline, on the gateway, or on a worker
//! context through the coordinator.

mod coordinator;
mod queue;
mod types;
mod worker;

pub use types::PoolStats;

use crate::accel::AccelerationGateway;
use crate::classify::{ExecutionPlan, PlanExecutor, SignatureClassifier, Strategy};
use crate::core::config::EngineConfig;
use crate::core::errors::{Result, ThreaderError};
use crate::core::metrics::{ExecutionMetrics, ExecutionTimer};
use crate::task::{Kernel, Task, TaskHandle, TaskId};
use coordinator::Coordinator;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};
use types::{PendingTask, PoolCommand, PoolGauges};

struct PoolInner {
    commands: mpsc::UnboundedSender<PoolCommand>,
    gauges: Arc<PoolGauges>,
    classifier: Arc<SignatureClassifier>,
    metrics: Arc<ExecutionMetrics>,
    next_task_id: AtomicU64,
    default_timeout_ms: AtomicU64,
    default_retries: u32,
    max_retries: u32,
    max_priority: u8,
}

#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Spawn the coordinator and `config.max_workers` workers.
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: &EngineConfig,
        classifier: Arc<SignatureClassifier>,
        metrics: Arc<ExecutionMetrics>,
    ) -> Result<Self> {
        config.validate()?;

        let (commands, receiver) = mpsc::unbounded_channel();
        let gauges = Arc::new(PoolGauges::default());
        let coordinator = Coordinator::new(
            config.max_workers,
            config.queue_capacity,
            config.shrink_policy,
            config.shutdown_grace,
            receiver,
            gauges.clone(),
        )?;
        tokio::spawn(coordinator.run());

        Ok(Self {
            inner: Arc::new(PoolInner {
                commands,
                gauges,
                classifier,
                metrics,
                next_task_id: AtomicU64::new(1),
                default_timeout_ms: AtomicU64::new(config.default_timeout.as_millis() as u64),
                default_retries: config.default_retries,
                max_retries: config.max_retries,
                max_priority: config.max_priority_levels.saturating_sub(1),
            }),
        })
    }

    /// Start a task and return its handle
    pub fn submit(&self, task: Task) -> Result<TaskHandle> {
        if self.is_closed() {
            return Err(ThreaderError::shutdown("submit"));
        }

        let task_id = self.inner.next_task_id.fetch_add(1, Ordering::Relaxed);
        let plan = self.inner.classifier.classify(&task.computation);
        self.inner.metrics.record_submitted();
        debug!(
            task_id,
            strategy = plan.strategy().as_str(),
            signature = %plan.signature,
            "Task submitted"
        );

        let pool = self.clone();
        let join = tokio::spawn(async move { pool.execute(task_id, plan, task).await });
        Ok(TaskHandle::new(task_id, join))
    }

    async fn execute(self, task_id: TaskId, plan: Arc<ExecutionPlan>, task: Task) -> Result<Value> {
        let timer = ExecutionTimer::start();

        let (strategy, outcome) = match &plan.executor {
            PlanExecutor::Recognized(op) => (
                Strategy::Recognized,
                op.apply(&task.input)
                    .map_err(|message| ThreaderError::execution(task_id, message)),
            ),
            PlanExecutor::Accelerated { gateway, fallback } => {
                match self.accelerate(gateway.as_ref(), &plan, &task).await {
                    Ok(value) => (Strategy::Accelerated, Ok(value)),
                    Err(e) if fallback.is_some() => {
                        warn!(task_id, error = %e, "Gateway failed, falling back to a worker");
                        self.inner.metrics.record_fallback();
                        (
                            Strategy::Isolated,
                            self.run_isolated(task_id, &plan, fallback.clone(), &task).await,
                        )
                    }
                    Err(e) => (Strategy::Accelerated, Err(e)),
                }
            }
            PlanExecutor::Isolated(kernel) => (
                Strategy::Isolated,
                self.run_isolated(task_id, &plan, kernel.clone(), &task).await,
            ),
        };

        trace!(
            task_id,
            strategy = strategy.as_str(),
            ok = outcome.is_ok(),
            duration_ms = timer.elapsed_ms(),
            "Task settled"
        );
        self.inner
            .metrics
            .record_settled(strategy, &outcome, timer.elapsed());
        outcome
    }

    async fn accelerate(
        &self,
        gateway: &dyn AccelerationGateway,
        plan: &ExecutionPlan,
        task: &Task,
    ) -> Result<Value> {
        let encoded = serde_json::to_string(&task.input)?;
        let handle = gateway.submit(&plan.signature, encoded).await?;

        let timeout = self.effective_timeout(task);
        let wait = if timeout.is_zero() { Duration::MAX } else { timeout };
        let encoded = gateway.get_result(handle, wait).await?;

        serde_json::from_str(&encoded).map_err(|e| {
            ThreaderError::gateway(plan.signature.as_str(), format!("undecodable result: {e}"))
        })
    }

    async fn run_isolated(
        &self,
        task_id: TaskId,
        plan: &Arc<ExecutionPlan>,
        kernel: Option<Kernel>,
        task: &Task,
    ) -> Result<Value> {
        let kernel = kernel.ok_or_else(|| ThreaderError::Unlinked {
            signature: plan.signature.to_string(),
        })?;
        let encoded_input = serde_json::to_string(&task.input)?;
        let timeout = self.effective_timeout(task);
        let retries = task
            .options
            .retries
            .unwrap_or(self.inner.default_retries)
            .min(self.inner.max_retries);
        let priority = task.options.priority.min(self.inner.max_priority);

        let mut attempt = 0;
        loop {
            let (responder, receiver) = oneshot::channel();
            let pending = PendingTask {
                task_id,
                plan: plan.clone(),
                kernel: kernel.clone(),
                encoded_input: encoded_input.clone(),
                timeout,
                priority,
                enqueued_at: Instant::now(),
                responder,
            };

            self.inner
                .commands
                .send(PoolCommand::Dispatch(pending))
                .map_err(|_| ThreaderError::shutdown("dispatch"))?;
            let outcome = receiver
                .await
                .unwrap_or_else(|_| Err(ThreaderError::shutdown("dispatch")));

            match outcome {
                Err(e) if e.is_recoverable() && attempt < retries => {
                    attempt += 1;
                    self.inner.metrics.record_retry();
                    debug!(task_id, attempt, retries, error = %e, "Retrying task");
                }
                other => return other,
            }
        }
    }

    fn effective_timeout(&self, task: &Task) -> Duration {
        task.options.timeout.unwrap_or_else(|| self.default_timeout())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.inner.default_timeout_ms.load(Ordering::Relaxed))
    }

    pub fn set_default_timeout(&self, timeout: Duration) {
        self.inner
            .default_timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    /// Grow or shrink to `workers` contexts
    pub async fn resize(&self, workers: usize) -> Result<()> {
        if workers == 0 {
            return Err(ThreaderError::configuration_field(
                "max_workers must be greater than 0",
                "max_workers",
            ));
        }
        let (reply, receiver) = oneshot::channel();
        self.inner
            .commands
            .send(PoolCommand::Resize { workers, reply })
            .map_err(|_| ThreaderError::shutdown("resize"))?;
        receiver
            .await
            .unwrap_or_else(|_| Err(ThreaderError::shutdown("resize")))
    }

    /// Reject outstanding work and stop every worker. Safe to call twice.
    pub async fn shutdown(&self) {
        self.inner.gauges.closed.store(true, Ordering::SeqCst);
        let (reply, receiver) = oneshot::channel();
        if self
            .inner
            .commands
            .send(PoolCommand::Shutdown { reply })
            .is_ok()
        {
            let _ = receiver.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.gauges.is_closed()
    }

    pub fn stats(&self) -> PoolStats {
        let gauges = &self.inner.gauges;
        PoolStats {
            total_workers: gauges.total_workers.load(Ordering::SeqCst),
            available_workers: gauges.available_workers.load(Ordering::SeqCst),
            queued_tasks: gauges.queued_tasks.load(Ordering::SeqCst),
            total_executions: self.inner.metrics.total_executions(),
            acceleration_available: self.inner.classifier.acceleration_available(),
        }
    }

    /// Tasks settled by worker contexts
    pub fn completed_count(&self) -> u64 {
        self.inner.gauges.completed_tasks.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Computation;
    use serde_json::json;

    fn pool(workers: usize) -> WorkerPool {
        let config = EngineConfig::builder()
            .max_workers(workers)
            .queue_capacity(4)
            .default_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        WorkerPool::new(
            &config,
            Arc::new(SignatureClassifier::new(None)),
            Arc::new(ExecutionMetrics::new()),
        )
        .unwrap()
    }

    fn slow(ms: u64) -> Computation {
        Computation::new(format!("x => sleep(x, {ms})"), move |v| {
            std::thread::sleep(Duration::from_millis(ms));
            Ok(v.clone())
        })
    }

    #[tokio::test]
    async fn test_recognized_runs_inline() {
        let pool = pool(1);
        let handle = pool
            .submit(Task::new(Computation::from_source("x => x * 2"), json!(21)))
            .unwrap();
        assert_eq!(handle.await.unwrap(), json!(42));
        assert_eq!(pool.completed_count(), 0);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_isolated_runs_on_worker() {
        let pool = pool(2);
        let computation = Computation::new("v => v.name", |v| Ok(v["name"].clone()));
        let handle = pool
            .submit(Task::new(computation, json!({"name": "ada"})))
            .unwrap();
        assert_eq!(handle.await.unwrap(), json!("ada"));
        assert_eq!(pool.completed_count(), 1);
        assert_eq!(pool.stats().total_executions, 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_unlinked_computation_fails() {
        let pool = pool(1);
        let err = pool
            .submit(Task::new(Computation::from_source("v => v.name"), json!({})))
            .unwrap()
            .await
            .unwrap_err();
        assert!(matches!(err, ThreaderError::Unlinked { .. }));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_queue_overflow_rejects() {
        let pool = pool(1);
        let handles: Vec<_> = (0..6)
            .map(|i| pool.submit(Task::new(slow(200), json!(i))).unwrap())
            .collect();

        let mut queue_full = 0;
        for handle in handles {
            if let Err(ThreaderError::QueueFull { capacity }) = handle.await {
                assert_eq!(capacity, 4);
                queue_full += 1;
            }
        }
        assert_eq!(queue_full, 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_priority_jumps_the_queue() {
        let pool = pool(1);
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let record = |label: &'static str| {
            let order = order.clone();
            Computation::new(format!("x => record('{label}')"), move |v| {
                std::thread::sleep(Duration::from_millis(20));
                order.lock().unwrap().push(label);
                Ok(v.clone())
            })
        };

        let blocker = pool.submit(Task::new(slow(100), json!(0))).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let low = pool.submit(Task::new(record("low"), json!(1))).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let high = pool
            .submit(Task::new(record("high"), json!(2)).with_priority(5))
            .unwrap();

        blocker.await.unwrap();
        low.await.unwrap();
        high.await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["high", "low"]);
        pool.shutdown().await;
    }
}
