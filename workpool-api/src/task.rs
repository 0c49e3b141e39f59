//! # Task Abstraction
//!
//! A task is an opaque unit of work with a single execution entry point. The
//! pool never looks inside a task: it moves the task into its queue on
//! submission, hands ownership to one worker on dequeue and invokes `run`
//! exactly once. `run` consumes the task, so a task can not be executed twice.
//!
//! Any `FnOnce() + Send + 'static` closure is a task. Closures that can fail
//! are adapted with [`fallible`], and [`named`] attaches a label that shows up
//! in worker logs and failure reports.
//!
//! ```rust
//! use workpool_api::task::{self, Task};
//!
//! let plain = || println!("hello from a worker");
//! let failing = task::fallible(|| anyhow::bail!("disk full"));
//! let labelled = task::named("flush-cache", || {});
//!
//! assert!(Box::new(plain).run().is_ok());
//! assert!(Box::new(failing).run().is_err());
//! assert_eq!(labelled.name(), "flush-cache");
//! ```

use crate::errors::TaskError;

/// Outcome of a single task execution.
pub type TaskResult = Result<(), TaskError>;

/// Type-erased task as stored in the work queue.
pub type BoxedTask = Box<dyn Task>;

/// A single-execution unit of work.
pub trait Task: Send + 'static {
    /// Executes the task, consuming it.
    fn run(self: Box<Self>) -> TaskResult;

    /// Label used in logs and failure reports.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<F> Task for F
where
    F: FnOnce() + Send + 'static,
{
    fn run(self: Box<Self>) -> TaskResult {
        (*self)();
        Ok(())
    }
}

/// Task adapter for closures returning `anyhow::Result<()>`.
pub struct Fallible<F>(F);

/// Wraps a fallible closure so its `Err` is reported as a task failure.
pub fn fallible<F>(f: F) -> Fallible<F>
where
    F: FnOnce() -> anyhow::Result<()> + Send + 'static,
{
    Fallible(f)
}

impl<F> Task for Fallible<F>
where
    F: FnOnce() -> anyhow::Result<()> + Send + 'static,
{
    fn run(self: Box<Self>) -> TaskResult {
        (self.0)().map_err(TaskError::from)
    }

    fn name(&self) -> &str {
        std::any::type_name::<F>()
    }
}

/// Task carrying an explicit name.
pub struct Named<T> {
    name: String,
    inner: T,
}

/// Attaches `name` to `task`.
pub fn named<T: Task>(name: impl Into<String>, task: T) -> Named<T> {
    Named {
        name: name.into(),
        inner: task,
    }
}

impl<T: Task> Task for Named<T> {
    fn run(self: Box<Self>) -> TaskResult {
        Box::new(self.inner).run()
    }

    fn name(&self) -> &str {
        &self.name
    }
}
