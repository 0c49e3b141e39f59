use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, trace};
use uuid::Uuid;
use workpool_api::errors::TaskError;
use workpool_api::task::BoxedTask;

use crate::queue::WorkQueue;
use super::failure::{FailureSink, TaskFailure};
use super::PoolStats;

/// Entry of the pool's work queue.
pub(crate) enum Job {
    /// A submitted task
    Run(BoxedTask),

    /// Poison pill: the worker that pops it exits its loop
    Shutdown,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::Run(task) => f.debug_tuple("Run").field(&task.name()).finish(),
            Job::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// # Worker Thread Implementation
///
/// A long-lived thread that repeatedly takes a job from the shared queue and
/// executes it.
///
/// ## Core Algorithm
/// 1. `blocking_pop` the next job from the shared queue
/// 2. `Job::Shutdown` ends the loop
/// 3. `Job::Run` executes the task with panic recovery
/// 4. Failures are logged and forwarded to the failure sink; the worker
///    carries on with the next job
///
/// Each worker consumes exactly one shutdown sentinel, so pushing one sentinel
/// per worker stops the whole pool.
pub(crate) struct Worker {
    /// Index of this worker within its pool
    id: usize,

    /// Identifier of the owning pool
    pool_id: Uuid,

    /// Queue shared with the pool and the other workers
    queue: Arc<WorkQueue<Job>>,

    /// Execution counters shared with the pool
    stats: Arc<PoolStats>,

    /// Where task failures are reported
    failure_sink: Option<Arc<dyn FailureSink>>,

    /// Tracing dispatcher of the thread that started the pool
    dispatch: tracing::Dispatch,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("pool_id", &self.pool_id)
            .field("has_failure_sink", &self.failure_sink.is_some())
            .finish()
    }
}

impl Worker {
    pub(crate) fn new(
        id: usize,
        pool_id: Uuid,
        queue: Arc<WorkQueue<Job>>,
        stats: Arc<PoolStats>,
        failure_sink: Option<Arc<dyn FailureSink>>,
        dispatch: tracing::Dispatch,
    ) -> Self {
        Self {
            id,
            pool_id,
            queue,
            stats,
            failure_sink,
            dispatch,
        }
    }

    /// Launches the worker loop on a new OS thread built by `builder`.
    pub(crate) fn spawn(self, builder: thread::Builder) -> io::Result<JoinHandle<()>> {
        builder.spawn(move || {
            let dispatch = self.dispatch.clone();
            tracing::dispatcher::with_default(&dispatch, || {
                let span = crate::worker_span!(self.pool_id, self.id);
                let _guard = span.enter();
                self.run_loop();
            });
        })
    }

    fn run_loop(&self) {
        debug!("worker started");

        loop {
            match self.queue.blocking_pop() {
                Job::Run(task) => self.execute(task),
                Job::Shutdown => break,
            }
        }

        debug!("worker received shutdown signal, exiting");
    }

    fn execute(&self, task: BoxedTask) {
        let task_name = task.name().to_string();
        self.stats.active.fetch_add(1, Ordering::SeqCst);
        crate::log_task!(task_name, "started");

        let outcome = panic::catch_unwind(AssertUnwindSafe(move || task.run()))
            .unwrap_or_else(|payload| Err(TaskError::from_panic(payload)));

        match outcome {
            Ok(()) => {
                self.stats.executed.fetch_add(1, Ordering::SeqCst);
                trace!(task = %task_name, "task completed");
            }
            Err(error) => {
                self.stats.failed.fetch_add(1, Ordering::SeqCst);
                self.report_failure(task_name, error);
            }
        }

        self.stats.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn report_failure(&self, task_name: String, error: TaskError) {
        crate::log_error!(error, task = %task_name, worker_id = self.id);

        if let Some(sink) = &self.failure_sink {
            let failure = TaskFailure {
                pool_id: self.pool_id,
                worker_id: self.id,
                task_name,
                error,
            };
            // A panicking sink must not take the worker down with it
            if panic::catch_unwind(AssertUnwindSafe(|| sink.report(failure))).is_err() {
                error!(worker_id = self.id, "failure sink panicked while reporting");
            }
        }
    }
}
