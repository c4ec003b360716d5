//! Isolated execution contexts
//!
//! Each worker is a dedicated OS thread reading jobs from its own channel.
//! Kernels run under `catch_unwind`; a panic is reported as a context failure
//! and ends the thread. A worker is abandoned by dropping its request sender:
//! the thread finishes whatever kernel it is running and then exits.

use super::types::{ActiveTask, WorkerEvent, WorkerId, WorkerJob, WorkerRequest};
use crate::core::errors::{Result, ThreaderError};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

/// Coordinator-side view of one worker
pub(crate) struct WorkerInstance {
    pub id: WorkerId,
    requests: mpsc::UnboundedSender<WorkerRequest>,
    thread: thread::JoinHandle<()>,
    /// Dispatched tasks keyed by correlation id
    pub active: HashMap<Uuid, ActiveTask>,
    pub created_at: Instant,
    pub completed_count: u64,
}

impl WorkerInstance {
    pub fn spawn(id: WorkerId, events: mpsc::UnboundedSender<WorkerEvent>) -> Result<Self> {
        let (requests, receiver) = mpsc::unbounded_channel();
        let thread = thread::Builder::new()
            .name(format!("threader-worker-{id}"))
            .spawn(move || run_worker(id, receiver, events))
            .map_err(|e| ThreaderError::internal(format!("failed to spawn worker {id}: {e}")))?;

        debug!(worker_id = id, "Spawned worker");
        Ok(Self {
            id,
            requests,
            thread,
            active: HashMap::new(),
            created_at: Instant::now(),
            completed_count: 0,
        })
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_empty()
    }

    /// Hand a job to the thread. False only if the thread is gone.
    pub fn send(&self, job: WorkerJob) -> bool {
        self.requests.send(WorkerRequest::Run(job)).is_ok()
    }

    /// Ask the thread to exit after its current job
    pub fn stop(&self) {
        debug!(
            worker_id = self.id,
            completed = self.completed_count,
            uptime_ms = self.created_at.elapsed().as_millis() as u64,
            "Stopping worker"
        );
        let _ = self.requests.send(WorkerRequest::Stop);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }
}

fn run_worker(
    worker_id: WorkerId,
    mut requests: mpsc::UnboundedReceiver<WorkerRequest>,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    let _ = events.send(WorkerEvent::Ready { worker_id });

    while let Some(request) = requests.blocking_recv() {
        let job = match request {
            WorkerRequest::Run(job) => job,
            WorkerRequest::Stop => break,
        };

        trace!(
            worker_id,
            task_id = job.task_id,
            source = job.source_text.as_deref().unwrap_or(""),
            timeout_ms = job.timeout_ms,
            "Worker picked up job"
        );

        let started = Instant::now();
        match panic::catch_unwind(AssertUnwindSafe(|| execute(&job))) {
            Ok(outcome) => {
                let _ = events.send(WorkerEvent::Completed {
                    worker_id,
                    correlation_id: job.correlation_id,
                    task_id: job.task_id,
                    outcome,
                    duration_ms: started.elapsed().as_millis() as u64,
                });
            }
            Err(payload) => {
                let _ = events.send(WorkerEvent::Failed {
                    worker_id,
                    reason: format!("kernel panicked: {}", panic_message(&*payload)),
                });
                return;
            }
        }
    }

    let _ = events.send(WorkerEvent::Exited { worker_id });
}

fn execute(job: &WorkerJob) -> std::result::Result<String, String> {
    let input: Value = serde_json::from_str(&job.encoded_input)
        .map_err(|e| format!("Failed to decode input: {e}"))?;
    let output = (job.kernel)(&input)?;
    serde_json::to_string(&output).map_err(|e| format!("Failed to encode result: {e}"))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Kernel;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn job(kernel: Kernel, input: Value) -> WorkerJob {
        WorkerJob {
            correlation_id: Uuid::new_v4(),
            task_id: 1,
            source_text: None,
            encoded_input: input.to_string(),
            timeout_ms: 0,
            kernel,
        }
    }

    #[tokio::test]
    async fn test_worker_runs_job_and_stops() {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let worker = WorkerInstance::spawn(7, events_tx).unwrap();

        assert!(matches!(
            events.recv().await,
            Some(WorkerEvent::Ready { worker_id: 7 })
        ));

        let kernel: Kernel = Arc::new(|v: &Value| Ok(json!(v["a"].as_i64().unwrap_or(0) + 1)));
        let request = job(kernel, json!({"a": 41}));
        let correlation = request.correlation_id;
        assert!(worker.send(request));

        match events.recv().await {
            Some(WorkerEvent::Completed {
                worker_id,
                correlation_id,
                outcome,
                ..
            }) => {
                assert_eq!(worker_id, 7);
                assert_eq!(correlation_id, correlation);
                assert_eq!(outcome, Ok("42".to_string()));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        worker.stop();
        assert!(matches!(
            events.recv().await,
            Some(WorkerEvent::Exited { worker_id: 7 })
        ));
    }

    #[tokio::test]
    async fn test_kernel_error_is_reported_verbatim() {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let worker = WorkerInstance::spawn(1, events_tx).unwrap();
        let _ = events.recv().await;

        let kernel: Kernel = Arc::new(|_: &Value| Err("Expected number".to_string()));
        let _ = worker.send(job(kernel, json!("x")));

        match events.recv().await {
            Some(WorkerEvent::Completed { outcome, .. }) => {
                assert_eq!(outcome, Err("Expected number".to_string()));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_panic_becomes_failure_and_thread_exits() {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let worker = WorkerInstance::spawn(3, events_tx).unwrap();
        let _ = events.recv().await;

        let kernel: Kernel =
            Arc::new(|_: &Value| -> std::result::Result<Value, String> { panic!("boom") });
        let _ = worker.send(job(kernel, json!(null)));

        match events.recv().await {
            Some(WorkerEvent::Failed { worker_id, reason }) => {
                assert_eq!(worker_id, 3);
                assert!(reason.contains("boom"));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        for _ in 0..100 {
            if worker.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(worker.is_finished());
    }
}
