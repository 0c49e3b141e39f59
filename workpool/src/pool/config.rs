use workpool_api::errors::PoolError;

/// Upper bound on the number of workers a single pool may run.
pub const MAX_WORKER_THREADS: usize = 1024;

pub const DEFAULT_THREAD_NAME_PREFIX: &str = "workpool-worker";

/// What happens to queued-but-undispatched tasks when a pool stops.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ShutdownPolicy {
    /// Every queued task runs before the workers exit.
    #[default]
    Drain,
    /// Queued tasks are dropped without running; the count is reported.
    Discard,
}

/// Configuration for a `ThreadPool`.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Number of worker threads.
    pub num_threads: usize,

    /// Prefix of worker thread names.
    pub thread_name_prefix: String,

    /// Stack size for worker threads; the platform default when `None`.
    pub stack_size: Option<usize>,

    /// Handling of pending tasks on `stop`.
    pub shutdown_policy: ShutdownPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_threads: num_cpus::get(),
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            stack_size: None,
            shutdown_policy: ShutdownPolicy::Drain,
        }
    }
}

impl PoolConfig {
    /// Config with `num_threads` workers and defaults for everything else.
    pub fn with_threads(num_threads: usize) -> Self {
        Self {
            num_threads,
            ..Default::default()
        }
    }

    /// Checks that the configuration describes a usable pool.
    pub fn validate(&self) -> Result<(), PoolError> {
        validate_thread_count(self.num_threads)?;

        if self.thread_name_prefix.contains('\0') {
            return Err(PoolError::InvalidConfiguration(
                "thread name prefix must not contain NUL bytes".to_string(),
            ));
        }

        if self.stack_size == Some(0) {
            return Err(PoolError::InvalidConfiguration(
                "worker stack size must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

fn validate_thread_count(num_threads: usize) -> Result<(), PoolError> {
    match num_threads {
        0 => Err(PoolError::InvalidConfiguration(
            "worker count must be at least 1".to_string(),
        )),
        n if n > MAX_WORKER_THREADS => Err(PoolError::InvalidConfiguration(format!(
            "worker count {} exceeds the maximum of {}",
            n, MAX_WORKER_THREADS
        ))),
        _ => Ok(()),
    }
}
