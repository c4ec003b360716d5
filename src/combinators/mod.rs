//! Concurrency combinators over already-running tasks
//!
//! Every handle passed in refers to a task that started when it was
//! submitted; the combinators only decide how outcomes are collected.

mod sink;

pub use sink::{DetachedSink, TracingSink};

use crate::core::errors::{Result, ThreaderError};
use crate::core::metrics::ExecutionMetrics;
use crate::task::{TaskHandle, ThreadResult};
use futures::future::join_all;
use futures::stream::{BoxStream, FuturesUnordered, StreamExt};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Await one handle, tagging its outcome with its input position
fn timed(index: usize, handle: TaskHandle) -> impl Future<Output = ThreadResult> + Send {
    let task_id = handle.id();
    let started = Instant::now();
    async move {
        let outcome = handle.await;
        ThreadResult {
            index,
            task_id,
            outcome,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// Values in input order. Waits for every task; if any failed, returns the
/// error of the lowest-index failure.
pub async fn all(handles: Vec<TaskHandle>) -> Result<Vec<Value>> {
    let outcomes = join_all(handles).await;
    outcomes.into_iter().collect()
}

/// Outcomes in completion order, each input exactly once
pub fn stream(handles: Vec<TaskHandle>) -> BoxStream<'static, ThreadResult> {
    handles
        .into_iter()
        .enumerate()
        .map(|(index, handle)| timed(index, handle))
        .collect::<FuturesUnordered<_>>()
        .boxed()
}

/// First task to settle, success or failure. The others keep running.
pub async fn race(handles: Vec<TaskHandle>) -> Result<ThreadResult> {
    if handles.is_empty() {
        return Err(ThreaderError::NoTasks);
    }
    let winner = stream(handles).next().await.ok_or(ThreaderError::NoTasks)?;
    debug!(index = winner.index, task_id = winner.task_id, "Race settled");
    Ok(winner)
}

/// The first `n` outcomes in completion order. When `n` covers every task,
/// all outcomes are returned in input order.
pub async fn any(n: usize, handles: Vec<TaskHandle>) -> Result<Vec<ThreadResult>> {
    if n == 0 {
        return Ok(Vec::new());
    }
    if n >= handles.len() {
        let pending = handles
            .into_iter()
            .enumerate()
            .map(|(index, handle)| timed(index, handle));
        return Ok(join_all(pending).await);
    }
    Ok(stream(handles).take(n).collect::<Vec<_>>().await)
}

/// Detach every task. Outcomes go to `sink`; failures are also counted.
/// Must be called from within a Tokio runtime.
pub fn fire(
    handles: Vec<TaskHandle>,
    sink: Arc<dyn DetachedSink>,
    metrics: Option<Arc<ExecutionMetrics>>,
) {
    for handle in handles {
        let sink = sink.clone();
        let metrics = metrics.clone();
        let task_id = handle.id();
        tokio::spawn(async move {
            match handle.await {
                Ok(_) => sink.on_success(task_id),
                Err(e) => {
                    if let Some(metrics) = &metrics {
                        metrics.record_detached_failure();
                    }
                    sink.on_failure(task_id, &e);
                }
            }
        });
    }
}
