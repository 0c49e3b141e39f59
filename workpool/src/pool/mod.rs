//! # Thread Pool Module
//!
//! A fixed set of worker threads fed by one shared [`WorkQueue`].
//!
//! ## Lifecycle
//!
//! ```text
//! Created --initialize--> Initialized --start--> Running --stop--> Stopping --> Stopped
//!                               ^                                                 |
//!                               +-------------------initialize--------------------+
//! ```
//!
//! - `initialize` fixes the worker count
//! - `start` spawns the workers
//! - `submit` is accepted only while `Running`
//! - `stop` wakes every worker with a shutdown sentinel and joins them
//!
//! ## Shutdown Policy
//! With [`ShutdownPolicy::Drain`] (the default) the sentinels queue up behind
//! every pending task, so all submitted tasks run before `stop` returns. With
//! [`ShutdownPolicy::Discard`] pending tasks are removed first and their number
//! is reported in [`ShutdownReport::discarded`]. Tasks already executing always
//! finish; there is no forced cancellation.
//!
//! ## Thread Safety
//! - The queue's mutex serializes every push and pop
//! - The lifecycle sits behind an `RwLock`: `submit` holds the read side across
//!   its push, `stop` takes the write side to switch to `Stopping`, so no task
//!   can slip in behind the sentinels
//! - A `stop` that finds another `stop` in progress waits on a condition
//!   variable until the pool is `Stopped`
//! - `start` holds the worker-handle mutex for its whole duration and joins
//!   any worker left detached by a `stop` issued from one of its own tasks
//! - Counters are atomics shared with the workers

pub mod config;
pub mod failure;
mod worker;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{
    Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::thread::{self, JoinHandle, ThreadId};

use tracing::{debug, warn};
use uuid::Uuid;
use workpool_api::errors::{PoolError, SubmitError, TaskError};
use workpool_api::task::Task;

use crate::logging;
use crate::queue::WorkQueue;
use worker::{Job, Worker};

pub use config::{PoolConfig, ShutdownPolicy, MAX_WORKER_THREADS};
pub use failure::{FailureSink, TaskFailure};

/// Lifecycle states of a `ThreadPool`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Constructed, worker count not chosen yet
    Created,

    /// Worker count set, no workers running
    Initialized,

    /// Workers are running and tasks are accepted
    Running,

    /// `stop` is waking and joining the workers
    Stopping,

    /// All workers have been joined
    Stopped,
}

/// Execution counters shared between a pool and its workers
#[derive(Debug, Default)]
pub(crate) struct PoolStats {
    pub(crate) executed: AtomicUsize,
    pub(crate) failed: AtomicUsize,
    pub(crate) active: AtomicUsize,
}

/// Outcome of a `stop` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Worker threads joined by this call
    pub workers_joined: usize,

    /// Queued tasks dropped without running (`ShutdownPolicy::Discard` only)
    pub discarded: usize,
}

/// Snapshot of a pool's state and counters
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Configured number of worker threads
    pub pool_size: usize,

    /// Jobs waiting in the queue
    pub queued: usize,

    /// Tasks executing right now
    pub active: usize,

    /// Tasks that completed successfully
    pub executed: usize,

    /// Tasks that returned an error or panicked
    pub failed: usize,

    /// Current lifecycle state
    pub state: PoolState,
}

struct Lifecycle {
    state: PoolState,
    num_threads: usize,
    /// Threads spawned by the last successful `start`
    worker_threads: Vec<ThreadId>,
}

/// Fixed-size worker thread pool
///
/// The pool is an ordinary owned value: share it with collaborators by
/// reference or wrap it in an `Arc`. Independent pools do not interact.
///
/// # Worker Thread Behavior
/// 1. Pops the next job from the shared queue, sleeping while it is empty
/// 2. Runs the task, catching errors and panics
/// 3. Reports failures through logging and the optional [`FailureSink`]
/// 4. Exits after popping a shutdown sentinel
///
/// Dropping a pool stops it, so no worker outlives the queue it waits on.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use workpool::ThreadPool;
///
/// let pool = ThreadPool::new();
/// pool.initialize(4).unwrap();
/// pool.start().unwrap();
///
/// let counter = Arc::new(AtomicUsize::new(0));
/// for _ in 0..100 {
///     let counter = counter.clone();
///     pool.submit(move || {
///         counter.fetch_add(1, Ordering::SeqCst);
///     }).unwrap();
/// }
///
/// pool.stop().unwrap();
/// assert_eq!(counter.load(Ordering::SeqCst), 100);
/// ```
pub struct ThreadPool {
    /// Identifier used in logs and thread names
    id: Uuid,

    /// Base configuration
    config: PoolConfig,

    /// Lifecycle state and chosen worker count
    lifecycle: RwLock<Lifecycle>,

    /// Queue shared with the workers
    queue: Arc<WorkQueue<Job>>,

    /// Join handles of running workers, or of a worker that stopped its own
    /// pool and has not been joined yet
    workers: Mutex<Vec<JoinHandle<()>>>,

    /// Paired with `stopped`; guards the `Stopping -> Stopped` transition
    shutdown: Mutex<()>,

    /// Signalled once a `stop` has joined the workers
    stopped: Condvar,

    /// Execution counters
    stats: Arc<PoolStats>,

    /// Receiver of task failures
    failure_sink: Option<Arc<dyn FailureSink>>,
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("pool_size", &self.pool_size())
            .field("queued", &self.queue.len())
            .finish()
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadPool {
    /// Creates a pool in the `Created` state with the default configuration
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    /// Creates a pool in the `Created` state
    ///
    /// `config.num_threads` is reported by [`pool_size`](Self::pool_size) until
    /// [`initialize`](Self::initialize) chooses the actual worker count.
    pub fn with_config(config: PoolConfig) -> Self {
        let id = Uuid::new_v4();
        crate::log_lifecycle!(id, "created", policy = ?config.shutdown_policy);

        Self {
            id,
            lifecycle: RwLock::new(Lifecycle {
                state: PoolState::Created,
                num_threads: config.num_threads,
                worker_threads: Vec::new(),
            }),
            config,
            queue: Arc::new(WorkQueue::new()),
            workers: Mutex::new(Vec::new()),
            shutdown: Mutex::new(()),
            stopped: Condvar::new(),
            stats: Arc::new(PoolStats::default()),
            failure_sink: None,
        }
    }

    /// Installs the sink that receives every task failure
    pub fn with_failure_sink(mut self, sink: impl FailureSink) -> Self {
        self.failure_sink = Some(Arc::new(sink));
        self
    }

    // The lifecycle is only modified in short sections that can not panic
    // halfway, so a poisoned lock still holds a valid state.
    fn read_lifecycle(&self) -> RwLockReadGuard<'_, Lifecycle> {
        self.lifecycle.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_lifecycle(&self) -> RwLockWriteGuard<'_, Lifecycle> {
        self.lifecycle.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_workers(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_shutdown(&self) -> MutexGuard<'_, ()> {
        self.shutdown.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets the number of worker threads
    ///
    /// Allowed from `Created`, `Initialized` and `Stopped`; the last one
    /// re-initializes a stopped pool so it can be started again.
    ///
    /// # Errors
    /// * `InvalidConfiguration` - `num_threads` is zero or above
    ///   [`MAX_WORKER_THREADS`]; the state is left untouched
    /// * `AlreadyRunning` - workers are running or stopping
    pub fn initialize(&self, num_threads: usize) -> Result<(), PoolError> {
        PoolConfig {
            num_threads,
            ..self.config.clone()
        }
        .validate()?;

        let mut lifecycle = self.write_lifecycle();
        match lifecycle.state {
            PoolState::Running | PoolState::Stopping => Err(PoolError::AlreadyRunning),
            PoolState::Created | PoolState::Initialized | PoolState::Stopped => {
                lifecycle.num_threads = num_threads;
                lifecycle.state = PoolState::Initialized;
                crate::log_lifecycle!(self.id, "initialized", num_threads);
                Ok(())
            }
        }
    }

    /// Spawns the worker threads and starts accepting tasks
    ///
    /// Workers log through the tracing dispatcher active on the calling thread.
    /// A worker of the previous run that stopped the pool from inside a task
    /// is joined first, so it can never pick up work of the new run.
    ///
    /// # Errors
    /// * `AlreadyRunning` - the pool is running or stopping, or the caller is
    ///   a worker of the previous run that has not exited yet
    /// * `NotInitialized` - `initialize` was not called since construction or
    ///   the last `stop`
    /// * `WorkerSpawn` - a thread could not be spawned; workers spawned so far
    ///   are shut down and the pool stays `Initialized`
    pub fn start(&self) -> Result<(), PoolError> {
        let span = crate::pool_span!(self.id);
        let _guard = span.enter();

        let mut workers = self.lock_workers();
        match self.state() {
            PoolState::Running | PoolState::Stopping => return Err(PoolError::AlreadyRunning),
            PoolState::Created | PoolState::Stopped => return Err(PoolError::NotInitialized),
            PoolState::Initialized => {}
        }

        // The detached worker still owns one sentinel in the queue.
        if !self.join_detached(&mut workers) {
            warn!(pool_id = %self.id, "start called from a worker of the previous run");
            return Err(PoolError::AlreadyRunning);
        }

        let mut lifecycle = self.write_lifecycle();
        let dispatch = logging::current_subscriber();

        for worker_id in 0..lifecycle.num_threads {
            let worker = Worker::new(
                worker_id,
                self.id,
                self.queue.clone(),
                self.stats.clone(),
                self.failure_sink.clone(),
                dispatch.clone(),
            );

            match worker.spawn(self.thread_builder(worker_id)) {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    crate::log_error!(e, pool_id = %self.id, worker_id);
                    for _ in 0..workers.len() {
                        self.queue.push(Job::Shutdown);
                    }
                    for handle in workers.drain(..) {
                        self.join_worker(handle);
                    }
                    return Err(PoolError::WorkerSpawn(e.to_string()));
                }
            }
        }

        lifecycle.worker_threads = workers.iter().map(|handle| handle.thread().id()).collect();
        lifecycle.state = PoolState::Running;
        crate::log_lifecycle!(self.id, "started", workers = workers.len());
        Ok(())
    }

    /// Joins `handle`, logging an abnormal termination
    ///
    /// Returns whether the thread exited cleanly.
    fn join_worker(&self, handle: JoinHandle<()>) -> bool {
        let name = handle.thread().name().unwrap_or("unnamed").to_string();
        match handle.join() {
            Ok(()) => true,
            Err(payload) => {
                crate::log_error!(
                    TaskError::from_panic(payload),
                    pool_id = %self.id,
                    worker = %name,
                    "worker thread terminated abnormally"
                );
                false
            }
        }
    }

    /// Joins the handles a `stop` left behind in `workers`
    ///
    /// Returns `false` when the calling thread is one of them; its own handle
    /// stays in `workers`.
    fn join_detached(&self, workers: &mut Vec<JoinHandle<()>>) -> bool {
        let current = thread::current().id();
        let (own, detached): (Vec<_>, Vec<_>) = workers
            .drain(..)
            .partition(|handle| handle.thread().id() == current);

        for handle in detached {
            debug!(pool_id = %self.id, "joining worker left over from the previous run");
            self.join_worker(handle);
        }

        let is_detached_worker = !own.is_empty();
        workers.extend(own);
        !is_detached_worker
    }

    fn thread_builder(&self, worker_id: usize) -> thread::Builder {
        let short_id = self.id.simple().to_string();
        let builder = thread::Builder::new().name(format!(
            "{}-{}-{}",
            self.config.thread_name_prefix,
            &short_id[..8],
            worker_id
        ));

        match self.config.stack_size {
            Some(size) => builder.stack_size(size),
            None => builder,
        }
    }

    /// Queues a task for execution
    ///
    /// Never waits for the task to run. The task is executed exactly once by
    /// some worker, in FIFO order relative to other submissions.
    ///
    /// # Errors
    /// Returns the task inside a [`SubmitError`] when the pool is not
    /// `Running`; it was not enqueued.
    pub fn submit<T: Task>(&self, task: T) -> Result<(), SubmitError<T>> {
        let lifecycle = self.read_lifecycle();
        if lifecycle.state != PoolState::Running {
            debug!(pool_id = %self.id, state = ?lifecycle.state, "rejected task submission");
            return Err(SubmitError(task));
        }

        self.queue.push(Job::Run(Box::new(task)));
        Ok(())
    }

    /// Stops the workers and joins them
    ///
    /// Pending tasks are run or dropped according to the configured
    /// [`ShutdownPolicy`]; tasks already executing always complete. No task
    /// starts after this returns. Calling `stop` on a pool that is not running
    /// returns an empty report. A caller that finds another `stop` in progress
    /// blocks until the pool is `Stopped`, then returns an empty report.
    ///
    /// A worker thread that calls `stop` (directly or by dropping the last
    /// handle to its pool) is signalled but not joined by itself and never
    /// waits for another `stop`. Its handle is joined by the next `start` or
    /// when the pool is dropped.
    ///
    /// # Errors
    /// * `WorkerJoin` - a worker thread terminated abnormally; every other
    ///   worker has still been joined and the pool is `Stopped`
    pub fn stop(&self) -> Result<ShutdownReport, PoolError> {
        let span = crate::pool_span!(self.id);
        let _guard = span.enter();

        let mut report = ShutdownReport::default();
        let current = thread::current().id();
        // Dropped after the lifecycle lock is released; a task's captures may
        // run arbitrary code on drop.
        let mut discarded_jobs = Vec::new();

        {
            let mut lifecycle = self.write_lifecycle();
            match lifecycle.state {
                PoolState::Running => {}
                PoolState::Stopping if !lifecycle.worker_threads.contains(&current) => {
                    drop(lifecycle);
                    debug!(pool_id = %self.id, "stop already in progress, waiting for it to finish");
                    self.wait_until_stopped();
                    return Ok(report);
                }
                state => {
                    debug!(pool_id = %self.id, ?state, "stop requested on a pool that is not running");
                    return Ok(report);
                }
            }
            lifecycle.state = PoolState::Stopping;
            crate::log_lifecycle!(self.id, "stopping", policy = ?self.config.shutdown_policy);

            if self.config.shutdown_policy == ShutdownPolicy::Discard {
                for job in self.queue.drain() {
                    match job {
                        Job::Run(_) => discarded_jobs.push(job),
                        Job::Shutdown => self.queue.push(job),
                    }
                }
            }

            for _ in 0..lifecycle.worker_threads.len() {
                self.queue.push(Job::Shutdown);
            }
        }

        report.discarded = discarded_jobs.len();
        drop(discarded_jobs);

        // Join without the lifecycle lock: running tasks may still call
        // `submit` or `state` on this pool.
        let handles = std::mem::take(&mut *self.lock_workers());
        let mut join_failures = Vec::new();

        for handle in handles {
            if handle.thread().id() == current {
                warn!(pool_id = %self.id, "stop called from one of this pool's workers, leaving it detached");
                self.lock_workers().push(handle);
                continue;
            }

            let name = handle.thread().name().unwrap_or("unnamed").to_string();
            if self.join_worker(handle) {
                report.workers_joined += 1;
            } else {
                join_failures.push(name);
            }
        }

        {
            let _shutdown = self.lock_shutdown();
            self.write_lifecycle().state = PoolState::Stopped;
            self.stopped.notify_all();
        }
        crate::log_lifecycle!(
            self.id,
            "stopped",
            workers_joined = report.workers_joined,
            discarded = report.discarded
        );

        if join_failures.is_empty() {
            Ok(report)
        } else {
            Err(PoolError::WorkerJoin(join_failures.join(", ")))
        }
    }

    fn wait_until_stopped(&self) {
        let shutdown = self.lock_shutdown();
        let _shutdown = self
            .stopped
            .wait_while(shutdown, |_| self.state() == PoolState::Stopping)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Current lifecycle state
    pub fn state(&self) -> PoolState {
        self.read_lifecycle().state
    }

    /// Worker count chosen by `initialize`, or the configured default
    pub fn pool_size(&self) -> usize {
        self.read_lifecycle().num_threads
    }

    /// Identifier of this pool
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Snapshot of state and counters
    ///
    /// Values are read one after another and may be mutually inconsistent
    /// while the pool is running.
    pub fn metrics(&self) -> PoolMetrics {
        let (state, pool_size) = {
            let lifecycle = self.read_lifecycle();
            (lifecycle.state, lifecycle.num_threads)
        };

        PoolMetrics {
            pool_size,
            queued: self.queue.len(),
            active: self.stats.active.load(Ordering::SeqCst),
            executed: self.stats.executed.load(Ordering::SeqCst),
            failed: self.stats.failed.load(Ordering::SeqCst),
            state,
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            crate::log_error!(e, pool_id = %self.id, "failed to stop pool on drop");
        }
        self.join_detached(&mut self.lock_workers());
    }
}
