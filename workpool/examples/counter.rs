// Runs 1000 small tasks on a four-worker pool and prints what happened.
//
// RUST_LOG=workpool=trace cargo run --example counter

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use workpool::{logging, task, PoolConfig, ShutdownPolicy, TaskFailure, ThreadPool};

fn main() -> anyhow::Result<()> {
    logging::init_development();

    let (failures_tx, failures_rx) = flume::unbounded::<TaskFailure>();
    let pool = ThreadPool::with_config(PoolConfig {
        shutdown_policy: ShutdownPolicy::Drain,
        ..PoolConfig::with_threads(4)
    })
    .with_failure_sink(failures_tx);

    pool.initialize(4)?;
    pool.start()?;

    let counter = Arc::new(AtomicUsize::new(0));
    for i in 0..1000 {
        let counter = counter.clone();
        pool.submit(task::named(format!("increment-{}", i), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }))?;
    }

    pool.submit(task::named(
        "validate",
        task::fallible(|| anyhow::bail!("nothing to validate")),
    ))?;

    let report = pool.stop()?;
    let metrics = pool.metrics();

    logging::info!(
        counter = counter.load(Ordering::SeqCst),
        executed = metrics.executed,
        failed = metrics.failed,
        workers_joined = report.workers_joined,
        "pool drained"
    );

    for failure in failures_rx.try_iter() {
        logging::warn!(%failure, "task failure reported");
    }

    Ok(())
}
