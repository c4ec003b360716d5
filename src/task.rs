//! Tasks, computations and the handles returned to callers

use crate::core::errors::{Result, ThreaderError};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::task::JoinHandle;

pub type TaskId = u64;

/// A pure transformation linked into the binary ahead of time.
/// The `Err` string is surfaced verbatim as an execution error.
pub type Kernel = Arc<dyn Fn(&Value) -> std::result::Result<Value, String> + Send + Sync>;

/// A computation: its textual form (used for classification) and, for
/// anything outside the recognized and accelerated catalogs, a linked kernel.
#[derive(Clone)]
pub struct Computation {
    source: Arc<str>,
    kernel: Option<Kernel>,
}

impl Computation {
    /// Computation backed by a kernel that runs on a worker context
    pub fn new<F>(source: impl Into<Arc<str>>, kernel: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            source: source.into(),
            kernel: Some(Arc::new(kernel)),
        }
    }

    /// Computation described only by its source text. Runs if the source
    /// classifies as recognized or accelerated; otherwise dispatch fails
    /// with `ThreaderError::Unlinked`.
    pub fn from_source(source: impl Into<Arc<str>>) -> Self {
        Self {
            source: source.into(),
            kernel: None,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn kernel(&self) -> Option<&Kernel> {
        self.kernel.as_ref()
    }
}

impl fmt::Debug for Computation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computation")
            .field("source", &self.source)
            .field("linked", &self.kernel.is_some())
            .finish()
    }
}

/// Per-task options
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    /// Overrides the pool's default timeout; `Duration::ZERO` disables it
    pub timeout: Option<Duration>,
    /// Overrides the configured default retry count
    pub retries: Option<u32>,
    /// Higher values leave the queue first
    pub priority: u8,
}

impl TaskOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }
}

/// One unit of work. Immutable once built; consumed by a single dispatch.
#[derive(Debug, Clone)]
pub struct Task {
    pub computation: Computation,
    pub input: Value,
    pub options: TaskOptions,
}

impl Task {
    pub fn new(computation: Computation, input: Value) -> Self {
        Self {
            computation,
            input,
            options: TaskOptions::default(),
        }
    }

    pub fn with_options(mut self, options: TaskOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.options.retries = Some(retries);
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.options.priority = priority;
        self
    }
}

/// Handle to a submitted task. The task is already running; awaiting the
/// handle yields its outcome. Dropping the handle detaches the task.
pub struct TaskHandle {
    id: TaskId,
    join: JoinHandle<Result<Value>>,
}

impl TaskHandle {
    pub(crate) fn new(id: TaskId, join: JoinHandle<Result<Value>>) -> Self {
        Self { id, join }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle").field("id", &self.id).finish()
    }
}

impl Future for TaskHandle {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let id = self.id;
        match Pin::new(&mut self.join).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(e)) => Poll::Ready(Err(ThreaderError::internal(format!(
                "task {id} driver aborted: {e}"
            )))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Outcome of one task as reported by a combinator
#[derive(Debug)]
pub struct ThreadResult {
    /// Position of the task in the combinator's input
    pub index: usize,
    pub task_id: TaskId,
    pub outcome: Result<Value>,
    /// Time from when the combinator began awaiting the task to its outcome
    pub duration_ms: u64,
}

impl ThreadResult {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn value(&self) -> Option<&Value> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&ThreaderError> {
        self.outcome.as_ref().err()
    }

    pub fn into_result(self) -> Result<Value> {
        self.outcome
    }
}
