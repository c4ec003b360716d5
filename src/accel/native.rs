//! In-process gateway backed by the tokio blocking pool.

use super::{AccelerationGateway, GatewayCapabilities, ResultHandle};
use crate::classify::recognized::number;
use crate::classify::Signature;
use crate::core::errors::{Result, ThreaderError};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NativeKernel {
    Sum,
    Max,
    Min,
    SortAscending,
    MapDouble,
}

const CATALOG: &[(&str, NativeKernel)] = &[
    ("xs=>xs.reduce((a,b)=>a+b,0)", NativeKernel::Sum),
    ("xs=>Math.max(...xs)", NativeKernel::Max),
    ("xs=>Math.min(...xs)", NativeKernel::Min),
    ("xs=>xs.sort((a,b)=>a-b)", NativeKernel::SortAscending),
    ("xs=>xs.map(x=>x*2)", NativeKernel::MapDouble),
];

impl NativeKernel {
    fn lookup(signature: &Signature) -> Option<Self> {
        CATALOG
            .iter()
            .find(|(sig, _)| *sig == signature.as_str())
            .map(|(_, kernel)| *kernel)
    }

    fn run(self, input: &Value) -> std::result::Result<Value, String> {
        let numbers = input
            .as_array()
            .ok_or_else(|| "Expected array of numbers".to_string())?
            .iter()
            .map(|v| v.as_f64().ok_or_else(|| format!("Expected number, got {v}")))
            .collect::<std::result::Result<Vec<f64>, String>>()?;

        Ok(match self {
            Self::Sum => number(numbers.iter().sum()),
            // Math.max() of nothing is -Infinity, which JSON cannot carry
            Self::Max => numbers
                .iter()
                .copied()
                .reduce(f64::max)
                .map(number)
                .unwrap_or(Value::Null),
            Self::Min => numbers
                .iter()
                .copied()
                .reduce(f64::min)
                .map(number)
                .unwrap_or(Value::Null),
            Self::SortAscending => {
                let mut sorted = numbers;
                sorted.sort_by(f64::total_cmp);
                Value::Array(sorted.into_iter().map(number).collect())
            }
            Self::MapDouble => Value::Array(numbers.into_iter().map(|n| number(n * 2.0)).collect()),
        })
    }
}

/// Gateway that runs a small catalog of array kernels on the blocking pool
pub struct NativeGateway {
    jobs: DashMap<u64, JoinHandle<Result<String>>>,
    next_handle: AtomicU64,
    available: AtomicBool,
    parallel_capacity: usize,
}

impl NativeGateway {
    pub fn new() -> Self {
        Self {
            jobs: DashMap::new(),
            next_handle: AtomicU64::new(1),
            available: AtomicBool::new(true),
            parallel_capacity: num_cpus::get().max(1),
        }
    }

    /// Take the gateway offline; plans classified afterwards go to workers
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Jobs submitted but not yet collected
    pub fn pending_jobs(&self) -> usize {
        self.jobs.len()
    }
}

impl Default for NativeGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccelerationGateway for NativeGateway {
    fn name(&self) -> &str {
        "native"
    }

    fn capabilities(&self) -> GatewayCapabilities {
        GatewayCapabilities {
            signatures: CATALOG.iter().map(|(sig, _)| sig.to_string()).collect(),
            parallel_capacity: self.parallel_capacity,
        }
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn supports(&self, signature: &Signature) -> bool {
        NativeKernel::lookup(signature).is_some()
    }

    async fn submit(&self, signature: &Signature, encoded_input: String) -> Result<ResultHandle> {
        if !self.is_available() {
            return Err(ThreaderError::gateway(signature.as_str(), "gateway offline"));
        }
        let kernel = NativeKernel::lookup(signature).ok_or_else(|| {
            ThreaderError::gateway(signature.as_str(), "signature not in catalog")
        })?;

        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let sig = signature.to_string();
        let job = tokio::task::spawn_blocking(move || -> Result<String> {
            let input: Value = serde_json::from_str(&encoded_input)?;
            let output = kernel
                .run(&input)
                .map_err(|message| ThreaderError::gateway(sig, message))?;
            Ok(serde_json::to_string(&output)?)
        });
        self.jobs.insert(handle, job);
        debug!(handle, signature = %signature, "Native gateway job submitted");

        Ok(ResultHandle(handle))
    }

    async fn get_result(&self, handle: ResultHandle, timeout: Duration) -> Result<String> {
        let (_, job) = self.jobs.remove(&handle.0).ok_or_else(|| {
            ThreaderError::gateway("<unknown>", format!("no job for handle {}", handle.0))
        })?;

        match tokio::time::timeout(timeout, job).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(ThreaderError::gateway(
                "<native>",
                format!("job {} aborted: {}", handle.0, e),
            )),
            Err(_) => {
                warn!(
                    handle = handle.0,
                    timeout_ms = timeout.as_millis() as u64,
                    "Native gateway job timed out"
                );
                Err(ThreaderError::gateway(
                    "<native>",
                    format!("job {} exceeded {}ms", handle.0, timeout.as_millis()),
                ))
            }
        }
    }
}

/// Host facts reported alongside the gateway
#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub cpu_count: usize,
    pub version: &'static str,
}

pub fn system_info() -> SystemInfo {
    SystemInfo {
        cpu_count: num_cpus::get(),
        version: env!("CARGO_PKG_VERSION"),
    }
}

impl SystemInfo {
    pub fn to_json(&self) -> Value {
        json!({ "cpu_count": self.cpu_count, "version": self.version })
    }
}
