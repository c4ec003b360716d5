//! Messages exchanged between pool handles, the coordinator and workers

use crate::classify::ExecutionPlan;
use crate::core::errors::{Result, ThreaderError};
use crate::task::{Kernel, TaskId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use uuid::Uuid;

pub(crate) type WorkerId = u64;

/// A task waiting for, or assigned to, a worker
pub(crate) struct PendingTask {
    pub task_id: TaskId,
    pub plan: Arc<ExecutionPlan>,
    pub kernel: Kernel,
    pub encoded_input: String,
    /// Zero disables the timer
    pub timeout: Duration,
    pub priority: u8,
    pub enqueued_at: Instant,
    pub responder: oneshot::Sender<Result<Value>>,
}

impl PendingTask {
    /// Deliver the outcome; a caller that went away is not an error
    pub fn settle(self, outcome: Result<Value>) {
        let _ = self.responder.send(outcome);
    }

    pub fn reject(self, error: ThreaderError) {
        self.settle(Err(error));
    }
}

impl fmt::Debug for PendingTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTask")
            .field("task_id", &self.task_id)
            .field("signature", &self.plan.signature)
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// A dispatched task as tracked on its worker
pub(crate) struct ActiveTask {
    pub task: PendingTask,
    pub timer: Option<AbortHandle>,
    pub dispatched_at: Instant,
}

impl ActiveTask {
    pub fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Commands accepted by the coordinator
pub(crate) enum PoolCommand {
    Dispatch(PendingTask),
    Resize {
        workers: usize,
        reply: oneshot::Sender<Result<()>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Sent by a task timer when it fires
#[derive(Debug, Clone, Copy)]
pub(crate) struct Expiry {
    pub worker_id: WorkerId,
    pub correlation_id: Uuid,
}

/// Job shipped to a worker context
pub(crate) struct WorkerJob {
    pub correlation_id: Uuid,
    pub task_id: TaskId,
    pub source_text: Option<Arc<str>>,
    pub encoded_input: String,
    pub timeout_ms: u64,
    pub kernel: Kernel,
}

pub(crate) enum WorkerRequest {
    Run(WorkerJob),
    Stop,
}

/// Events emitted by worker contexts
#[derive(Debug, Clone)]
pub(crate) enum WorkerEvent {
    Ready {
        worker_id: WorkerId,
    },
    Completed {
        worker_id: WorkerId,
        correlation_id: Uuid,
        task_id: TaskId,
        /// JSON-encoded value, or the kernel's error message
        outcome: std::result::Result<String, String>,
        duration_ms: u64,
    },
    /// The context crashed; its thread is gone
    Failed {
        worker_id: WorkerId,
        reason: String,
    },
    Exited {
        worker_id: WorkerId,
    },
}

/// Gauges published by the coordinator after every transition
#[derive(Debug, Default)]
pub(crate) struct PoolGauges {
    pub total_workers: AtomicUsize,
    pub available_workers: AtomicUsize,
    pub queued_tasks: AtomicUsize,
    pub completed_tasks: AtomicU64,
    pub closed: AtomicBool,
}

impl PoolGauges {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Point-in-time view of the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub total_workers: usize,
    pub available_workers: usize,
    pub queued_tasks: usize,
    pub total_executions: u64,
    pub acceleration_available: bool,
}
