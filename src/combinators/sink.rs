use crate::core::errors::ThreaderError;
use crate::task::TaskId;
use tracing::{debug, error};

/// Receives the outcomes of detached (fire-and-forget) tasks
pub trait DetachedSink: Send + Sync + 'static {
    fn on_failure(&self, task_id: TaskId, error: &ThreaderError);

    fn on_success(&self, _task_id: TaskId) {}
}

/// Default sink: failures are logged and otherwise dropped
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DetachedSink for TracingSink {
    fn on_failure(&self, task_id: TaskId, error: &ThreaderError) {
        error!(
            task_id,
            category = error.category(),
            error = %error,
            "Detached task failed"
        );
    }

    fn on_success(&self, task_id: TaskId) {
        debug!(task_id, "Detached task completed");
    }
}
