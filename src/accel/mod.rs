//! Acceleration gateway
//!
//! An optional collaborator that executes a fixed catalog of signatures
//! without going through a worker context. The engine only needs to know
//! whether a gateway is attached and which signatures it advertises; values
//! cross the boundary JSON-encoded.

pub mod native;

pub use native::{system_info, NativeGateway, SystemInfo};

use crate::classify::Signature;
use crate::core::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Opaque ticket for a submitted gateway job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResultHandle(pub u64);

/// What a gateway can run and how much it can run at once
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayCapabilities {
    /// Normalized signatures the gateway executes
    pub signatures: Vec<String>,
    /// Hint for how many jobs it runs in parallel
    pub parallel_capacity: usize,
}

#[async_trait]
pub trait AccelerationGateway: Send + Sync + 'static {
    /// Name used in logs
    fn name(&self) -> &str;

    fn capabilities(&self) -> GatewayCapabilities;

    /// Whether the gateway can take work right now
    fn is_available(&self) -> bool {
        true
    }

    fn supports(&self, signature: &Signature) -> bool {
        self.capabilities()
            .signatures
            .iter()
            .any(|s| s == signature.as_str())
    }

    /// Queue a job; `encoded_input` is the JSON encoding of the input value
    async fn submit(&self, signature: &Signature, encoded_input: String) -> Result<ResultHandle>;

    /// Wait up to `timeout` for a job's JSON-encoded result
    async fn get_result(&self, handle: ResultHandle, timeout: Duration) -> Result<String>;
}
