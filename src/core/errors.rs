use thiserror::Error;

/// Unified error type for the threader engine
#[derive(Debug, Error)]
pub enum ThreaderError {
    /// The computation itself failed inside its execution context
    #[error("Execution failed for task {task_id}: {message}")]
    Execution { task_id: u64, message: String },

    /// The task exceeded its timeout and its worker was terminated
    #[error("Task {task_id} timed out after {timeout_ms}ms")]
    Timeout { task_id: u64, timeout_ms: u64 },

    /// The isolated context hosting the task crashed or exited
    #[error("Worker {worker_id} failed: {reason}")]
    ContextFailure { worker_id: u64, reason: String },

    /// The engine was shut down while the task was queued or in flight
    #[error("Engine is shut down: {operation}")]
    Shutdown { operation: String },

    /// The worker holding the task was removed by a capacity change
    #[error("Worker {worker_id} removed by capacity change")]
    CapacityChange { worker_id: u64 },

    /// The acceleration gateway could not produce a result
    #[error("Acceleration gateway error for {signature}: {message}")]
    Gateway { signature: String, message: String },

    /// Isolated strategy selected but the computation carries no linked kernel
    #[error("No kernel linked for computation `{signature}`")]
    Unlinked { signature: String },

    /// Queue overflow
    #[error("Queue full: capacity {capacity} reached")]
    QueueFull { capacity: usize },

    /// A combinator that needs at least one task received none
    #[error("No tasks provided")]
    NoTasks,

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Encoding or decoding of a value failed
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ThreaderError {
    /// Create an execution error carrying the computation's own message
    pub fn execution<M: Into<String>>(task_id: u64, message: M) -> Self {
        Self::Execution {
            task_id,
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(task_id: u64, timeout_ms: u64) -> Self {
        Self::Timeout {
            task_id,
            timeout_ms,
        }
    }

    /// Create a context failure error
    pub fn context_failure<R: Into<String>>(worker_id: u64, reason: R) -> Self {
        Self::ContextFailure {
            worker_id,
            reason: reason.into(),
        }
    }

    /// Create a shutdown error
    pub fn shutdown<S: Into<String>>(operation: S) -> Self {
        Self::Shutdown {
            operation: operation.into(),
        }
    }

    /// Create a gateway error
    pub fn gateway<S: Into<String>, M: Into<String>>(signature: S, message: M) -> Self {
        Self::Gateway {
            signature: signature.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            field: None,
        }
    }

    /// Create a configuration error naming the offending field
    pub fn configuration_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Configuration {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether re-dispatching the same task could succeed.
    /// Timeouts and crashed contexts are infrastructure conditions; an
    /// execution error from a pure computation will repeat.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::ContextFailure { .. })
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Execution { .. } => "execution",
            Self::Timeout { .. } => "timeout",
            Self::ContextFailure { .. } => "context_failure",
            Self::Shutdown { .. } => "shutdown",
            Self::CapacityChange { .. } => "capacity_change",
            Self::Gateway { .. } => "gateway",
            Self::Unlinked { .. } => "unlinked",
            Self::QueueFull { .. } => "queue",
            Self::NoTasks => "no_tasks",
            Self::Configuration { .. } => "configuration",
            Self::Serialization(_) => "serialization",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ThreaderError>;

/// Macro for creating errors with less ceremony
#[macro_export]
macro_rules! threader_error {
    (execution, $task_id:expr, $message:expr) => {
        $crate::ThreaderError::execution($task_id, $message)
    };
    (timeout, $task_id:expr, $timeout_ms:expr) => {
        $crate::ThreaderError::timeout($task_id, $timeout_ms)
    };
    (shutdown, $operation:expr) => {
        $crate::ThreaderError::shutdown($operation)
    };
    (configuration, $message:expr) => {
        $crate::ThreaderError::configuration($message)
    };
    (configuration, $message:expr, $field:expr) => {
        $crate::ThreaderError::configuration_field($message, $field)
    };
}
