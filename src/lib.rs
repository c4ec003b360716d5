//! threader: routes pure computations to the cheapest execution strategy and
//! delivers their results through `all`, `stream`, `race`, `any` and `fire`.
//!
//! ```no_run
//! use serde_json::json;
//! use threader::{Computation, EngineConfig, TaskOptions, Threader};
//!
//! # async fn demo() -> threader::Result<()> {
//! let threader = Threader::new(EngineConfig::development())?;
//! let double = Computation::from_source("x => x * 2");
//! let handles = vec![
//!     threader.submit_computation(double.clone(), json!(1), TaskOptions::default())?,
//!     threader.submit_computation(double, json!(2), TaskOptions::default())?,
//! ];
//! assert_eq!(threader.all(handles).await?, vec![json!(2), json!(4)]);
//! threader.shutdown().await?;
//! # Ok(())
//! # }
//! ```

// Core infrastructure modules
pub mod core {
    pub mod config;
    pub mod errors;
    pub mod metrics;
}

pub mod accel;
pub mod classify;
pub mod combinators;
pub mod engine;
pub mod pool;
pub mod task;

// Re-exports for convenience
pub use accel::{
    system_info, AccelerationGateway, GatewayCapabilities, NativeGateway, ResultHandle, SystemInfo,
};
pub use classify::{
    ExecutionPlan, PlanCache, RecognizedOp, Signature, SignatureClassifier, Strategy,
};
pub use combinators::{DetachedSink, TracingSink};
pub use crate::core::config::{ConfigUpdate, EngineConfig, EngineConfigBuilder, ShrinkPolicy};
pub use crate::core::errors::{Result, ThreaderError};
pub use crate::core::metrics::{ExecutionMetrics, MetricsSnapshot};
pub use engine::{Threader, ThreaderBuilder};
pub use pool::{PoolStats, WorkerPool};
pub use task::{Computation, Kernel, Task, TaskHandle, TaskId, TaskOptions, ThreadResult};

/// Install a global fmt subscriber at `level`. Does nothing if one is
/// already installed, so tests may call it freely.
pub fn init_tracing(level: tracing::Level) {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(level)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
