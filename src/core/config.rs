use crate::core::errors::{Result, ThreaderError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What happens to busy workers selected for removal when the pool shrinks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ShrinkPolicy {
    /// Stop dispatching to the worker and stop it once its tasks settle
    #[default]
    Drain,
    /// Reject the worker's in-flight tasks with a capacity-change error
    Reject,
}

/// Engine configuration with all tuning parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    // Worker pool configuration
    /// Number of isolated worker contexts
    pub max_workers: usize,
    /// Policy applied to busy workers when the pool shrinks
    pub shrink_policy: ShrinkPolicy,
    /// How long shutdown waits for workers to exit before abandoning them
    pub shutdown_grace: Duration,

    // Queue configuration
    /// Maximum number of tasks waiting for a worker
    pub queue_capacity: usize,
    /// Number of priority levels; task priorities are clamped below this
    pub max_priority_levels: u8,

    // Task execution configuration
    /// Default per-task timeout; zero disables the timer
    pub default_timeout: Duration,
    /// Default number of retries for recoverable failures
    pub default_retries: u32,
    /// Maximum allowed retries
    pub max_retries: u32,

    // Acceleration
    /// Route supported signatures to the acceleration gateway when one is attached
    pub enable_acceleration: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: num_cpus::get().max(1),
            shrink_policy: ShrinkPolicy::Drain,
            shutdown_grace: Duration::from_millis(500),

            queue_capacity: 10_000,
            max_priority_levels: 10,

            default_timeout: Duration::from_secs(30),
            default_retries: 0,
            max_retries: 10,

            enable_acceleration: true,
        }
    }
}

impl EngineConfig {
    /// Create a new builder for EngineConfig
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(ThreaderError::configuration_field(
                "max_workers must be greater than 0",
                "max_workers",
            ));
        }
        if self.queue_capacity == 0 {
            return Err(ThreaderError::configuration_field(
                "queue_capacity must be greater than 0",
                "queue_capacity",
            ));
        }
        if self.max_priority_levels == 0 {
            return Err(ThreaderError::configuration_field(
                "max_priority_levels must be greater than 0",
                "max_priority_levels",
            ));
        }
        if self.default_retries > self.max_retries {
            return Err(ThreaderError::configuration_field(
                "default_retries cannot exceed max_retries",
                "default_retries",
            ));
        }
        Ok(())
    }

    /// Small pool and short timeouts for development/testing
    pub fn development() -> Self {
        Self {
            max_workers: 4,
            queue_capacity: 100,
            default_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_millis(100),
            ..Default::default()
        }
    }

    /// Pool sized to the machine with a deep queue
    pub fn production() -> Self {
        let cpu_count = num_cpus::get().max(1);

        Self {
            max_workers: cpu_count,
            queue_capacity: 100_000,
            shutdown_grace: Duration::from_secs(2),
            default_retries: 1,
            ..Default::default()
        }
    }
}

/// Runtime update accepted by `Threader::configure`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigUpdate {
    pub max_workers: Option<usize>,
    pub timeout: Option<Duration>,
}

impl ConfigUpdate {
    pub fn max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = Some(max_workers);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Apply onto a config and validate the result
    pub fn apply_to(&self, config: &EngineConfig) -> Result<EngineConfig> {
        let mut next = config.clone();
        if let Some(max_workers) = self.max_workers {
            next.max_workers = max_workers;
        }
        if let Some(timeout) = self.timeout {
            next.default_timeout = timeout;
        }
        next.validate()?;
        Ok(next)
    }
}

/// Builder for EngineConfig
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    /// Set number of workers
    pub fn max_workers(mut self, max_workers: usize) -> Self {
        self.config.max_workers = max_workers;
        self
    }

    /// Set queue capacity
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Set default task timeout
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = timeout;
        self
    }

    /// Set retry configuration
    pub fn retries(mut self, default: u32, max: u32) -> Self {
        self.config.default_retries = default;
        self.config.max_retries = max;
        self
    }

    /// Set shutdown grace period
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }

    pub fn shrink_policy(mut self, policy: ShrinkPolicy) -> Self {
        self.config.shrink_policy = policy;
        self
    }

    /// Enable/disable the acceleration gateway route
    pub fn acceleration(mut self, enabled: bool) -> Self {
        self.config.enable_acceleration = enabled;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<EngineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
