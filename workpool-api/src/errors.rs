//! # Pool Error Types
//!
//! This module defines the error types shared by every workpool component.
//!
//! ## Error Classification
//!
//! - `PoolError`: configuration and lifecycle errors, surfaced synchronously
//!   to the caller of the offending pool operation
//! - `TaskError`: a task failed while executing on a worker. These never reach
//!   the submitter; the worker logs them and forwards them to a failure sink
//! - `SubmitError<T>`: a rejected submission that hands the task back so the
//!   caller can retry or escalate
//!
//! ## Usage Example
//!
//! ```rust
//! use workpool_api::errors::PoolError;
//!
//! fn describe(error: &PoolError) -> &'static str {
//!     match error {
//!         PoolError::InvalidConfiguration(_) => "fix the worker count",
//!         PoolError::PoolNotRunning => "start the pool first",
//!         _ => "lifecycle error",
//!     }
//! }
//! ```

use std::fmt;

use thiserror::Error;

/// Errors reported synchronously by pool lifecycle operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The requested worker count is zero or otherwise unusable.
    ///
    /// The pool keeps its previous state.
    #[error("Invalid pool configuration: {0}")]
    InvalidConfiguration(String),

    /// `start` or `initialize` was called while workers are running.
    #[error("Thread pool is already running")]
    AlreadyRunning,

    /// A task was submitted before `start` or after `stop` began.
    #[error("Thread pool is not running")]
    PoolNotRunning,

    /// `start` was called without a preceding `initialize`.
    #[error("Thread pool has not been initialized")]
    NotInitialized,

    /// The operating system refused to spawn a worker thread.
    #[error("Failed to spawn worker thread: {0}")]
    WorkerSpawn(String),

    /// A worker thread terminated abnormally and could not be joined cleanly.
    #[error("Failed to join worker thread: {0}")]
    WorkerJoin(String),
}

/// Failure raised by a task while a worker executed it.
#[derive(Error, Debug)]
pub enum TaskError {
    /// The task returned an error.
    #[error("Task failed: {0}")]
    Failed(#[from] anyhow::Error),

    /// The task panicked. Holds the panic payload when it was a string.
    #[error("Task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Builds a `Panicked` error from a payload caught by `catch_unwind`.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        TaskError::Panicked(message)
    }
}

/// A submission the pool refused because it was not running.
///
/// The rejected task is handed back untouched.
#[derive(PartialEq, Eq, Clone, Copy)]
pub struct SubmitError<T>(pub T);

impl<T> SubmitError<T> {
    /// Returns the task that was not enqueued.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for SubmitError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmitError").finish_non_exhaustive()
    }
}

impl<T> fmt::Display for SubmitError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task rejected: {}", PoolError::PoolNotRunning)
    }
}

impl<T> std::error::Error for SubmitError<T> {}

impl<T> From<SubmitError<T>> for PoolError {
    fn from(_: SubmitError<T>) -> Self {
        PoolError::PoolNotRunning
    }
}
