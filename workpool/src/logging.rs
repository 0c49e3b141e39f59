// Logging for workpool
//
// Thin layer over the `tracing` ecosystem. Pools and workers emit structured
// events through `tracing`; applications pick how they are rendered by
// installing a subscriber with one of the `init_*` functions below.
//
// # Usage Examples
//
// ```rust
// use workpool::logging;
//
// // INFO level, human readable console output
// logging::init_default();
//
// // Or pick the settings yourself
// let config = logging::LogConfig {
//     level: tracing::Level::DEBUG,
//     json_format: false,
//     ..Default::default()
// };
// logging::init(config);
// ```
//
// Worker threads inherit the dispatcher that was active on the thread calling
// `ThreadPool::start`, so a subscriber installed with
// `tracing::subscriber::set_default` in a test also captures worker output.
//
// Every worker runs inside a `worker` span carrying `pool_id` and
// `worker_id`, so filtering on `workpool::pool=debug` shows worker start and
// exit, and `workpool::pool=trace` shows each task.

use std::io;
use std::sync::Once;
use tracing::{Level, Subscriber};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Configuration for the logging system
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: Level,
    /// Whether to use JSON format for logs
    pub json_format: bool,
    /// Whether to include file and line information
    pub show_file_line: bool,
    /// Whether to include worker thread names and ids
    pub show_thread_info: bool,
    /// Whether to include timestamps
    pub show_time: bool,
    /// Target filter expressions (format: "target=level,target2=level2,...")
    pub target_filters: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            show_file_line: true,
            show_thread_info: true,
            show_time: true,
            target_filters: None,
        }
    }
}

static INIT: Once = Once::new();

fn env_filter(config: &LogConfig) -> EnvFilter {
    let mut filter = EnvFilter::from_default_env().add_directive(config.level.into());

    if let Some(filters) = &config.target_filters {
        for directive in filters.split(',') {
            match directive.trim().parse() {
                Ok(directive) => filter = filter.add_directive(directive),
                Err(e) => eprintln!("Ignoring invalid log filter '{}': {}", directive, e),
            }
        }
    }

    filter
}

/// Initialize the global subscriber with the given configuration
///
/// Only the first call of any `init*` function takes effect.
pub fn init(config: LogConfig) {
    INIT.call_once(|| {
        let registry = tracing_subscriber::registry().with(env_filter(&config));

        let subscriber: Box<dyn Subscriber + Send + Sync> = match (config.json_format, config.show_time) {
            (true, _) => Box::new(
                registry.with(
                    fmt::layer()
                        .json()
                        .flatten_event(true)
                        .with_thread_names(config.show_thread_info)
                        .with_thread_ids(config.show_thread_info),
                ),
            ),
            (false, true) => Box::new(registry.with(console_layer(&config))),
            (false, false) => Box::new(registry.with(console_layer(&config).without_time())),
        };

        set_global_subscriber(subscriber);
    });
}

fn console_layer<S>(config: &LogConfig) -> fmt::Layer<S>
where
    S: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_ansi(atty::is(atty::Stream::Stdout))
        .with_file(config.show_file_line)
        .with_line_number(config.show_file_line)
        .with_thread_names(config.show_thread_info)
        .with_thread_ids(config.show_thread_info)
}

fn set_global_subscriber<S>(subscriber: S)
where
    S: Subscriber + Send + Sync + 'static,
{
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Error setting global tracing subscriber: {}", err);
    }
}

/// Opens `path` for appending, creating it if needed
pub fn file_writer(path: &str) -> io::Result<std::fs::File> {
    std::fs::OpenOptions::new().create(true).append(true).open(path)
}

/// Initialize logging to both the console and `log_file`
///
/// The file is opened up front so a bad path is reported to the caller.
/// File output never contains ANSI colors.
pub fn init_with_file(config: LogConfig, log_file: &str) -> io::Result<()> {
    let file = file_writer(log_file)?;

    INIT.call_once(|| {
        let file_layer = fmt::layer()
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
            .with_file(true)
            .with_line_number(true)
            .with_thread_names(true)
            .with_thread_ids(true);

        let subscriber = tracing_subscriber::registry()
            .with(env_filter(&config))
            .with(console_layer(&config))
            .with(file_layer);

        set_global_subscriber(subscriber);
    });

    Ok(())
}

/// INFO level, human readable console output
pub fn init_default() {
    init(LogConfig::default());
}

/// DEBUG level, worker-level tracing for the pool module
pub fn init_development() {
    init(LogConfig {
        level: Level::DEBUG,
        target_filters: Some("workpool=debug,workpool::pool=trace".to_string()),
        ..Default::default()
    });
}

/// JSON output without source locations, for log aggregators
pub fn init_production() {
    init(LogConfig {
        level: Level::INFO,
        json_format: true,
        show_file_line: false,
        show_thread_info: true,
        show_time: true,
        target_filters: None,
    });
}

/// Warnings and errors only, compact output for test runs
pub fn init_test() {
    init(LogConfig {
        level: Level::WARN,
        json_format: false,
        show_file_line: true,
        show_thread_info: false,
        show_time: false,
        target_filters: None,
    });
}

/// Create a span for operations on one pool
///
/// ```rust
/// let pool_id = uuid::Uuid::new_v4();
/// let span = workpool::pool_span!(pool_id);
/// let _guard = span.enter();
/// ```
#[macro_export]
macro_rules! pool_span {
    ($pool_id:expr) => {
        tracing::info_span!("pool", pool_id = %$pool_id)
    };
    ($pool_id:expr, $($fields:tt)*) => {
        tracing::info_span!("pool", pool_id = %$pool_id, $($fields)*)
    };
}

/// Create the span a worker thread runs in
#[macro_export]
macro_rules! worker_span {
    ($pool_id:expr, $worker_id:expr) => {
        tracing::info_span!("worker", pool_id = %$pool_id, worker_id = $worker_id)
    };
}

/// Log pool lifecycle transitions
///
/// ```rust
/// let pool_id = uuid::Uuid::new_v4();
/// workpool::log_lifecycle!(pool_id, "started", workers = 4);
/// ```
#[macro_export]
macro_rules! log_lifecycle {
    ($pool_id:expr, $event:expr) => {
        tracing::info!(pool_id = %$pool_id, event = $event);
    };
    ($pool_id:expr, $event:expr, $($fields:tt)*) => {
        tracing::info!(pool_id = %$pool_id, event = $event, $($fields)*);
    };
}

/// Log per-task progress
#[macro_export]
macro_rules! log_task {
    ($task:expr, $status:expr) => {
        tracing::trace!(task = %$task, status = $status);
    };
    ($task:expr, $status:expr, $($fields:tt)*) => {
        tracing::trace!(task = %$task, status = $status, $($fields)*);
    };
}

/// Log error events
///
/// ```rust
/// let error = std::io::Error::new(std::io::ErrorKind::Other, "spawn failed");
/// workpool::log_error!(error, worker_id = 3);
/// ```
#[macro_export]
macro_rules! log_error {
    ($error:expr) => {
        tracing::error!(error = %$error);
    };
    ($error:expr, $($fields:tt)*) => {
        tracing::error!(error = %$error, $($fields)*);
    };
}

/// The dispatcher active on the calling thread
///
/// Pools capture it in `start` and install it on every worker thread.
#[inline]
pub fn current_subscriber() -> tracing::Dispatch {
    tracing::dispatcher::get_default(|d| d.clone())
}

pub use tracing::{debug, error, info, trace, warn};
