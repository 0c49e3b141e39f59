//! # Workpool API
//!
//! The contract between a fixed-size worker pool and the code that feeds it.
//!
//! ## Core Components
//!
//! - **Tasks**: opaque, single-execution units of work (`Task`)
//! - **Errors**: the lifecycle error taxonomy (`PoolError`), per-task failures
//!   (`TaskError`) and rejected submissions (`SubmitError`)
//!
//! The pool implementation lives in the `workpool` crate; producers only need
//! this crate to describe work.
//!
//! ## Module Organization
//!
//! - [`task`]: the task trait and closure adapters
//! - [`errors`]: error types

pub mod errors;
pub mod task;

pub use errors::{PoolError, SubmitError, TaskError};
pub use task::{fallible, named, BoxedTask, Fallible, Named, Task, TaskResult};
