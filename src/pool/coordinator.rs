//! Pool coordinator
//!
//! A single tokio task that owns the slot table and the pending queue. Pool
//! handles, task timers and workers talk to it over channels, so no lock
//! guards pool state.

use super::queue::PendingQueue;
use super::types::{
    ActiveTask, Expiry, PendingTask, PoolCommand, PoolGauges, WorkerEvent, WorkerId, WorkerJob,
};
use super::worker::WorkerInstance;
use crate::core::config::ShrinkPolicy;
use crate::core::errors::{Result, ThreaderError};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy)]
enum Location {
    Slot(usize),
    Retiring(usize),
}

pub(crate) struct Coordinator {
    slots: Vec<Option<WorkerInstance>>,
    /// Workers removed by a shrink that still have tasks to finish
    retiring: Vec<WorkerInstance>,
    queue: PendingQueue<PendingTask>,
    next_worker_id: WorkerId,
    shrink_policy: ShrinkPolicy,
    shutdown_grace: Duration,

    commands: mpsc::UnboundedReceiver<PoolCommand>,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    events: mpsc::UnboundedReceiver<WorkerEvent>,
    expiry_tx: mpsc::UnboundedSender<Expiry>,
    expiries: mpsc::UnboundedReceiver<Expiry>,

    gauges: Arc<PoolGauges>,
}

impl Coordinator {
    /// Build the coordinator and its initial workers
    pub fn new(
        workers: usize,
        queue_capacity: usize,
        shrink_policy: ShrinkPolicy,
        shutdown_grace: Duration,
        commands: mpsc::UnboundedReceiver<PoolCommand>,
        gauges: Arc<PoolGauges>,
    ) -> Result<Self> {
        let (events_tx, events) = mpsc::unbounded_channel();
        let (expiry_tx, expiries) = mpsc::unbounded_channel();

        let mut coordinator = Self {
            slots: Vec::with_capacity(workers),
            retiring: Vec::new(),
            queue: PendingQueue::new(queue_capacity),
            next_worker_id: 1,
            shrink_policy,
            shutdown_grace,
            commands,
            events_tx,
            events,
            expiry_tx,
            expiries,
            gauges,
        };

        for _ in 0..workers {
            let worker = coordinator.spawn_worker()?;
            coordinator.slots.push(Some(worker));
        }
        coordinator.publish();
        Ok(coordinator)
    }

    /// Main loop; returns once the pool has shut down
    pub async fn run(mut self) {
        info!(workers = self.slots.len(), "Pool coordinator started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(PoolCommand::Dispatch(task)) => self.dispatch(task),
                    Some(PoolCommand::Resize { workers, reply }) => {
                        let _ = reply.send(self.resize(workers));
                    }
                    Some(PoolCommand::Shutdown { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        info!("All pool handles dropped, shutting down");
                        self.shutdown().await;
                        break;
                    }
                },
                Some(event) = self.events.recv() => self.handle_event(event),
                Some(expiry) = self.expiries.recv() => self.expire(expiry),
            }
            self.publish();
        }

        self.publish();
        info!("Pool coordinator stopped");
    }

    fn spawn_worker(&mut self) -> Result<WorkerInstance> {
        let id = self.next_worker_id;
        self.next_worker_id += 1;
        WorkerInstance::spawn(id, self.events_tx.clone())
    }

    fn publish(&self) {
        let total = self.slots.iter().flatten().count();
        let available = self
            .slots
            .iter()
            .flatten()
            .filter(|w| w.is_idle())
            .count();
        self.gauges.total_workers.store(total, Ordering::SeqCst);
        self.gauges.available_workers.store(available, Ordering::SeqCst);
        self.gauges.queued_tasks.store(self.queue.len(), Ordering::SeqCst);
    }

    fn locate(&self, worker_id: WorkerId) -> Option<Location> {
        if let Some(index) = self
            .slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|w| w.id == worker_id))
        {
            return Some(Location::Slot(index));
        }
        self.retiring
            .iter()
            .position(|w| w.id == worker_id)
            .map(Location::Retiring)
    }

    fn worker_mut(&mut self, location: Location) -> Option<&mut WorkerInstance> {
        match location {
            Location::Slot(index) => self.slots.get_mut(index).and_then(Option::as_mut),
            Location::Retiring(index) => self.retiring.get_mut(index),
        }
    }

    fn take_worker(&mut self, location: Location) -> Option<WorkerInstance> {
        match location {
            Location::Slot(index) => self.slots.get_mut(index).and_then(Option::take),
            Location::Retiring(index) => {
                (index < self.retiring.len()).then(|| self.retiring.swap_remove(index))
            }
        }
    }

    fn idle_slot(&self) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(WorkerInstance::is_idle))
    }

    fn dispatch(&mut self, task: PendingTask) {
        if let Some(index) = self.idle_slot() {
            self.assign(index, task);
            return;
        }

        let priority = task.priority;
        if let Err(task) = self.queue.push(priority, task) {
            let capacity = self.queue.capacity();
            warn!(task_id = task.task_id, capacity, "Queue full, rejecting task");
            task.reject(ThreaderError::QueueFull { capacity });
        } else {
            debug!(queued = self.queue.len(), "No idle worker, task queued");
        }
    }

    fn assign(&mut self, index: usize, task: PendingTask) {
        let expiry_tx = self.expiry_tx.clone();
        let Some(worker) = self.slots.get_mut(index).and_then(Option::as_mut) else {
            task.reject(ThreaderError::internal("assigned to an empty slot"));
            return;
        };

        let correlation_id = Uuid::new_v4();
        let job = WorkerJob {
            correlation_id,
            task_id: task.task_id,
            source_text: task.plan.cached_text.clone(),
            encoded_input: task.encoded_input.clone(),
            timeout_ms: task.timeout.as_millis() as u64,
            kernel: task.kernel.clone(),
        };

        if !worker.send(job) {
            let worker_id = worker.id;
            task.reject(ThreaderError::context_failure(worker_id, "worker channel closed"));
            self.fail_worker(Location::Slot(index), "worker channel closed");
            return;
        }

        let timer = (!task.timeout.is_zero()).then(|| {
            let worker_id = worker.id;
            let timeout = task.timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let _ = expiry_tx.send(Expiry {
                    worker_id,
                    correlation_id,
                });
            })
            .abort_handle()
        });

        debug!(
            task_id = task.task_id,
            worker_id = worker.id,
            waited_ms = task.enqueued_at.elapsed().as_millis() as u64,
            "Task dispatched"
        );
        worker.active.insert(
            correlation_id,
            ActiveTask {
                task,
                timer,
                dispatched_at: Instant::now(),
            },
        );
    }

    /// Move queued tasks onto idle workers
    fn drain_queue(&mut self) {
        while !self.queue.is_empty() {
            let Some(index) = self.idle_slot() else {
                break;
            };
            let Some(task) = self.queue.pop() else {
                break;
            };
            self.assign(index, task);
        }
    }

    fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Ready { worker_id } => {
                debug!(worker_id, "Worker ready");
            }
            WorkerEvent::Completed {
                worker_id,
                correlation_id,
                task_id,
                outcome,
                duration_ms,
            } => self.complete(worker_id, correlation_id, task_id, outcome, duration_ms),
            WorkerEvent::Failed { worker_id, reason } => match self.locate(worker_id) {
                Some(location) => self.fail_worker(location, &reason),
                None => debug!(worker_id, %reason, "Ignoring failure from abandoned worker"),
            },
            WorkerEvent::Exited { worker_id } => {
                if let Some(location) = self.locate(worker_id) {
                    self.fail_worker(location, "worker exited unexpectedly");
                }
            }
        }
    }

    fn complete(
        &mut self,
        worker_id: WorkerId,
        correlation_id: Uuid,
        task_id: u64,
        outcome: std::result::Result<String, String>,
        duration_ms: u64,
    ) {
        let Some(location) = self.locate(worker_id) else {
            debug!(worker_id, task_id, "Ignoring completion from abandoned worker");
            return;
        };
        let Some(worker) = self.worker_mut(location) else {
            return;
        };
        let Some(mut active) = worker.active.remove(&correlation_id) else {
            return;
        };
        worker.completed_count += 1;
        active.cancel_timer();

        let result = match outcome {
            Ok(encoded) => serde_json::from_str(&encoded).map_err(ThreaderError::from),
            Err(message) => Err(ThreaderError::execution(task_id, message)),
        };
        debug!(
            task_id,
            worker_id,
            duration_ms,
            round_trip_ms = active.dispatched_at.elapsed().as_millis() as u64,
            success = result.is_ok(),
            "Task completed"
        );
        active.task.settle(result);
        self.gauges.completed_tasks.fetch_add(1, Ordering::Relaxed);

        match location {
            Location::Slot(_) => self.drain_queue(),
            Location::Retiring(_) => {
                let drained = self.worker_mut(location).is_some_and(|w| w.is_idle());
                if drained {
                    if let Some(worker) = self.take_worker(location) {
                        debug!(worker_id = worker.id, "Retired worker drained, stopping");
                        worker.stop();
                    }
                }
            }
        }
    }

    /// A task's timer fired: the task times out and its worker is replaced
    fn expire(&mut self, expiry: Expiry) {
        let Some(location) = self.locate(expiry.worker_id) else {
            return;
        };
        let still_running = self
            .worker_mut(location)
            .is_some_and(|w| w.active.contains_key(&expiry.correlation_id));
        if !still_running {
            return;
        }
        let Some(mut worker) = self.take_worker(location) else {
            return;
        };

        let worker_id = worker.id;
        let mut rejected = Vec::with_capacity(worker.active.len());
        for (correlation_id, mut active) in worker.active.drain() {
            active.cancel_timer();
            let task_id = active.task.task_id;
            let error = if correlation_id == expiry.correlation_id {
                let timeout_ms = active.task.timeout.as_millis() as u64;
                warn!(task_id, worker_id, timeout_ms, "Task timed out, terminating worker");
                ThreaderError::timeout(task_id, timeout_ms)
            } else {
                ThreaderError::context_failure(
                    worker_id,
                    "worker terminated after a co-resident task timed out",
                )
            };
            rejected.push((active.task, error));
        }
        drop(worker);

        self.settle_after_replacement(location, rejected);
    }

    /// Reject everything on a broken worker and replace it
    fn fail_worker(&mut self, location: Location, reason: &str) {
        let Some(mut worker) = self.take_worker(location) else {
            return;
        };
        error!(worker_id = worker.id, %reason, in_flight = worker.active.len(), "Worker failed");

        let worker_id = worker.id;
        let rejected = worker
            .active
            .drain()
            .map(|(_, mut active)| {
                active.cancel_timer();
                (active.task, ThreaderError::context_failure(worker_id, reason))
            })
            .collect();
        drop(worker);

        self.settle_after_replacement(location, rejected);
    }

    /// Callers woken by these rejections already see the healed pool
    fn settle_after_replacement(
        &mut self,
        location: Location,
        rejected: Vec<(PendingTask, ThreaderError)>,
    ) {
        if let Location::Slot(index) = location {
            self.replace(index);
        }
        self.publish();
        for (task, error) in rejected {
            task.reject(error);
        }
    }

    fn replace(&mut self, index: usize) {
        match self.spawn_worker() {
            Ok(worker) => {
                info!(slot = index, worker_id = worker.id, "Installed replacement worker");
                if let Some(slot) = self.slots.get_mut(index) {
                    *slot = Some(worker);
                }
            }
            Err(e) => error!(slot = index, error = %e, "Failed to spawn replacement worker"),
        }
        self.drain_queue();
    }

    fn resize(&mut self, workers: usize) -> Result<()> {
        let current = self.slots.len();
        let mut spawn_error = None;

        // Vacant slots left by failed replacements are filled first
        for index in 0..current.min(workers) {
            if self.slots[index].is_none() {
                match self.spawn_worker() {
                    Ok(worker) => self.slots[index] = Some(worker),
                    Err(e) => spawn_error = Some(e),
                }
            }
        }

        if workers > current {
            for _ in current..workers {
                match self.spawn_worker() {
                    Ok(worker) => self.slots.push(Some(worker)),
                    Err(e) => {
                        spawn_error = Some(e);
                        break;
                    }
                }
            }
        } else {
            while self.slots.len() > workers {
                if let Some(Some(worker)) = self.slots.pop() {
                    self.remove_worker(worker);
                }
            }
        }

        info!(from = current, to = self.slots.len(), "Pool resized");
        self.drain_queue();
        self.publish();
        spawn_error.map_or(Ok(()), Err)
    }

    fn remove_worker(&mut self, mut worker: WorkerInstance) {
        if worker.is_idle() {
            debug!(worker_id = worker.id, "Stopping idle worker");
            worker.stop();
            return;
        }

        match self.shrink_policy {
            ShrinkPolicy::Drain => {
                debug!(
                    worker_id = worker.id,
                    in_flight = worker.active.len(),
                    "Retiring busy worker"
                );
                self.retiring.push(worker);
            }
            ShrinkPolicy::Reject => {
                warn!(
                    worker_id = worker.id,
                    in_flight = worker.active.len(),
                    "Removing busy worker"
                );
                for (_, mut active) in worker.active.drain() {
                    active.cancel_timer();
                    active.task.reject(ThreaderError::CapacityChange {
                        worker_id: worker.id,
                    });
                }
            }
        }
    }

    async fn shutdown(&mut self) {
        self.gauges.closed.store(true, Ordering::SeqCst);

        let queued = self.queue.drain();
        let rejected_queued = queued.len();
        for task in queued {
            task.reject(ThreaderError::shutdown("task was queued"));
        }

        let mut workers: Vec<WorkerInstance> = self
            .slots
            .drain(..)
            .flatten()
            .chain(self.retiring.drain(..))
            .collect();

        let mut rejected_in_flight = 0;
        for worker in &mut workers {
            for (_, mut active) in worker.active.drain() {
                active.cancel_timer();
                active.task.reject(ThreaderError::shutdown("task was in flight"));
                rejected_in_flight += 1;
            }
            worker.stop();
        }

        let deadline = Instant::now() + self.shutdown_grace;
        while workers.iter().any(|w| !w.is_finished()) && Instant::now() < deadline {
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }

        let abandoned = workers.iter().filter(|w| !w.is_finished()).count();
        if abandoned > 0 {
            warn!(abandoned, "Workers still running after grace period, abandoning them");
        }
        self.publish();
        info!(
            workers = workers.len(),
            rejected_queued, rejected_in_flight, "Pool shut down"
        );
    }
}
