// Workpool
//
// A fixed-size worker thread pool fed by a single mutex/condvar work queue.
// Producers submit tasks, a bounded set of OS threads executes them in FIFO
// dequeue order, and `stop` shuts the workers down with one poison pill per
// worker.

pub mod logging;
pub mod pool;
pub mod queue;

// Re-export commonly used types
pub use pool::{
    FailureSink, PoolConfig, PoolMetrics, PoolState, ShutdownPolicy, ShutdownReport, TaskFailure,
    ThreadPool, MAX_WORKER_THREADS,
};
pub use queue::WorkQueue;
pub use workpool_api::*;
