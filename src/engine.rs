//! Engine facade
//!
//! `Threader` ties together the classifier, the worker pool, the metrics and
//! the combinators. Each instance is independent: its plan cache, workers and
//! counters are its own.

use crate::accel::{AccelerationGateway, NativeGateway};
use crate::classify::SignatureClassifier;
use crate::combinators::{self, DetachedSink, TracingSink};
use crate::core::config::{ConfigUpdate, EngineConfig};
use crate::core::errors::{Result, ThreaderError};
use crate::core::metrics::{ExecutionMetrics, MetricsSnapshot};
use crate::pool::{PoolStats, WorkerPool};
use crate::task::{Computation, Task, TaskHandle, TaskOptions, ThreadResult};
use futures::stream::BoxStream;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Builder for [`Threader`]
pub struct ThreaderBuilder {
    config: EngineConfig,
    gateway: Option<Arc<dyn AccelerationGateway>>,
    sink: Option<Arc<dyn DetachedSink>>,
}

impl ThreaderBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            gateway: None,
            sink: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach an acceleration gateway
    pub fn gateway(mut self, gateway: Arc<dyn AccelerationGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Attach the in-process [`NativeGateway`]
    pub fn native_gateway(self) -> Self {
        self.gateway(Arc::new(NativeGateway::new()))
    }

    /// Where failures of detached tasks are reported; defaults to [`TracingSink`]
    pub fn detached_sink(mut self, sink: Arc<dyn DetachedSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Build the engine and start its workers.
    /// Fails outside a Tokio runtime.
    pub fn build(self) -> Result<Threader> {
        self.config.validate()?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(ThreaderError::configuration(
                "Threader must be built inside a Tokio runtime",
            ));
        }

        let gateway = if self.config.enable_acceleration {
            self.gateway
        } else {
            None
        };
        let classifier = Arc::new(SignatureClassifier::new(gateway));
        let metrics = Arc::new(ExecutionMetrics::new());
        let pool = WorkerPool::new(&self.config, classifier.clone(), metrics.clone())?;

        info!(
            workers = self.config.max_workers,
            queue_capacity = self.config.queue_capacity,
            timeout_ms = self.config.default_timeout.as_millis() as u64,
            acceleration = classifier.acceleration_available(),
            "Threader started"
        );

        Ok(Threader {
            config: Mutex::new(self.config),
            pool,
            classifier,
            metrics,
            sink: self.sink.unwrap_or_else(|| Arc::new(TracingSink)),
        })
    }
}

impl Default for ThreaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Task dispatch and concurrency engine
pub struct Threader {
    config: Mutex<EngineConfig>,
    pool: WorkerPool,
    classifier: Arc<SignatureClassifier>,
    metrics: Arc<ExecutionMetrics>,
    sink: Arc<dyn DetachedSink>,
}

impl Threader {
    pub fn builder() -> ThreaderBuilder {
        ThreaderBuilder::new()
    }

    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    /// Submit a computation over `input`; the task starts immediately
    pub fn submit_computation(
        &self,
        computation: Computation,
        input: Value,
        options: TaskOptions,
    ) -> Result<TaskHandle> {
        self.submit(Task::new(computation, input).with_options(options))
    }

    pub fn submit(&self, task: Task) -> Result<TaskHandle> {
        self.pool.submit(task)
    }

    /// Submit several tasks; stops at the first rejected submission
    pub fn submit_batch<I>(&self, tasks: I) -> Result<Vec<TaskHandle>>
    where
        I: IntoIterator<Item = Task>,
    {
        tasks.into_iter().map(|task| self.submit(task)).collect()
    }

    /// Submit tasks in detached mode: outcomes only reach the sink and metrics
    pub fn fire_tasks<I>(&self, tasks: I) -> Result<()>
    where
        I: IntoIterator<Item = Task>,
    {
        let handles = self.submit_batch(tasks)?;
        self.fire(handles);
        Ok(())
    }

    fn ensure_open(&self, operation: &str) -> Result<()> {
        if self.pool.is_closed() {
            return Err(crate::threader_error!(shutdown, operation));
        }
        Ok(())
    }

    pub async fn all(&self, handles: Vec<TaskHandle>) -> Result<Vec<Value>> {
        self.ensure_open("all")?;
        combinators::all(handles).await
    }

    pub fn stream(&self, handles: Vec<TaskHandle>) -> Result<BoxStream<'static, ThreadResult>> {
        self.ensure_open("stream")?;
        Ok(combinators::stream(handles))
    }

    pub async fn race(&self, handles: Vec<TaskHandle>) -> Result<ThreadResult> {
        self.ensure_open("race")?;
        combinators::race(handles).await
    }

    pub async fn any(&self, n: usize, handles: Vec<TaskHandle>) -> Result<Vec<ThreadResult>> {
        self.ensure_open("any")?;
        combinators::any(n, handles).await
    }

    pub fn fire(&self, handles: Vec<TaskHandle>) {
        debug!(tasks = handles.len(), "Detaching tasks");
        combinators::fire(handles, self.sink.clone(), Some(self.metrics.clone()));
    }

    /// Apply a runtime update. The pool is resized before this returns.
    pub async fn configure(&self, update: ConfigUpdate) -> Result<()> {
        self.ensure_open("configure")?;
        let mut config = self.config.lock().await;
        let next = update.apply_to(&config)?;

        if next.max_workers != config.max_workers {
            self.pool.resize(next.max_workers).await?;
        }
        if next.default_timeout != config.default_timeout {
            self.pool.set_default_timeout(next.default_timeout);
        }

        info!(
            max_workers = next.max_workers,
            timeout_ms = next.default_timeout.as_millis() as u64,
            "Configuration updated"
        );
        *config = next;
        Ok(())
    }

    /// Reject outstanding work, stop the workers and drop cached plans.
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) -> Result<()> {
        let _config = self.config.lock().await;
        self.pool.shutdown().await;
        self.classifier.reset();
        Ok(())
    }

    pub fn is_shutdown(&self) -> bool {
        self.pool.is_closed()
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn classifier(&self) -> &SignatureClassifier {
        &self.classifier
    }

    pub async fn config(&self) -> EngineConfig {
        self.config.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn config() -> EngineConfig {
        EngineConfig::builder()
            .max_workers(2)
            .default_timeout(Duration::from_secs(5))
            .shutdown_grace(Duration::from_millis(200))
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_outside_runtime_fails() {
        let err = Threader::new(config()).err().unwrap();
        assert_eq!(err.category(), "configuration");
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut bad = config();
        bad.max_workers = 0;
        assert!(Threader::new(bad).is_err());
    }

    #[tokio::test]
    async fn test_submit_and_collect() {
        let threader = Threader::new(config()).unwrap();
        let handles = threader
            .submit_batch(
                (1..=3).map(|n| Task::new(Computation::from_source("x => x * 10"), json!(n))),
            )
            .unwrap();
        assert_eq!(
            threader.all(handles).await.unwrap(),
            vec![json!(10), json!(20), json!(30)]
        );
        assert_eq!(threader.metrics().recognized_executions, 3);
        threader.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_disabled_acceleration_ignores_gateway() {
        let threader = Threader::builder()
            .config(EngineConfig { enable_acceleration: false, ..config() })
            .native_gateway()
            .build()
            .unwrap();
        assert!(!threader.stats().acceleration_available);
        threader.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let threader = Threader::new(config()).unwrap();
        threader.shutdown().await.unwrap();
        threader.shutdown().await.unwrap();
        assert!(threader.is_shutdown());
        assert_eq!(threader.stats().total_workers, 0);
        assert!(threader.classifier().cache().is_empty());
    }
}
