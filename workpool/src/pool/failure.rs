use std::fmt;

use uuid::Uuid;
use workpool_api::errors::TaskError;

/// A task that failed on a worker.
///
/// Task failures never reach the submitter. Workers log them and hand them to
/// the pool's [`FailureSink`], if one is installed.
#[derive(Debug)]
pub struct TaskFailure {
    /// Pool the task ran on
    pub pool_id: Uuid,

    /// Index of the worker that executed the task
    pub worker_id: usize,

    /// Name of the failed task
    pub task_name: String,

    /// Error returned or panic raised by the task
    pub error: TaskError,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "task '{}' on worker {} failed: {}",
            self.task_name, self.worker_id, self.error
        )
    }
}

/// Receiver of task failures reported by workers.
///
/// `report` runs on the worker thread that observed the failure, so it should
/// return quickly.
pub trait FailureSink: Send + Sync + 'static {
    fn report(&self, failure: TaskFailure);
}

impl<F> FailureSink for F
where
    F: Fn(TaskFailure) + Send + Sync + 'static,
{
    fn report(&self, failure: TaskFailure) {
        self(failure)
    }
}

impl FailureSink for flume::Sender<TaskFailure> {
    fn report(&self, failure: TaskFailure) {
        if let Err(flume::SendError(failure)) = self.send(failure) {
            tracing::debug!(%failure, "failure receiver dropped, report discarded");
        }
    }
}
