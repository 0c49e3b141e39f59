// Integration tests for the ThreadPool lifecycle, dispatch and shutdown


use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use test_helpers::{counting_task, started_pool, started_pool_with, wait_until, DEFAULT_WAIT};
use workpool::errors::{PoolError, TaskError};
use workpool::task;
use workpool::{PoolConfig, PoolState, ShutdownPolicy, ShutdownReport, TaskFailure, ThreadPool};

fn explode() {
    panic!("kaboom");
}

fn broken_sink(_failure: TaskFailure) {
    panic!("sink is broken");
}

#[test]
fn test_new_pool_is_created() {
    let pool = ThreadPool::new();

    assert_eq!(pool.state(), PoolState::Created);
    assert_eq!(pool.pool_size(), num_cpus::get());
}

#[test]
fn test_initialize_zero_is_invalid() {
    let pool = ThreadPool::new();

    let err = pool.initialize(0).unwrap_err();
    assert!(matches!(err, PoolError::InvalidConfiguration(_)));
    assert_eq!(pool.state(), PoolState::Created);
    assert_eq!(pool.start(), Err(PoolError::NotInitialized));
}

#[test]
fn test_initialize_too_many_threads_is_invalid() {
    let pool = ThreadPool::new();

    let err = pool.initialize(workpool::MAX_WORKER_THREADS + 1).unwrap_err();
    assert!(matches!(err, PoolError::InvalidConfiguration(_)));
    assert_eq!(pool.state(), PoolState::Created);
}

#[test]
fn test_start_requires_initialize() {
    let pool = ThreadPool::new();
    assert_eq!(pool.start(), Err(PoolError::NotInitialized));

    pool.initialize(2).unwrap();
    assert_eq!(pool.state(), PoolState::Initialized);
    assert_eq!(pool.pool_size(), 2);

    pool.start().unwrap();
    assert_eq!(pool.state(), PoolState::Running);
}

#[test]
fn test_start_twice_is_already_running() -> anyhow::Result<()> {
    let pool = started_pool(2)?;

    assert_eq!(pool.start(), Err(PoolError::AlreadyRunning));
    assert_eq!(pool.initialize(3), Err(PoolError::AlreadyRunning));
    assert_eq!(pool.state(), PoolState::Running);
    assert_eq!(pool.pool_size(), 2);
    Ok(())
}

#[test]
fn test_submit_before_start_is_rejected() {
    let pool = ThreadPool::new();
    let counter = Arc::new(AtomicUsize::new(0));

    let err = pool.submit(counting_task(&counter)).unwrap_err();
    assert_eq!(PoolError::from(err), PoolError::PoolNotRunning);

    pool.initialize(1).unwrap();
    assert!(pool.submit(counting_task(&counter)).is_err());
    assert_eq!(pool.metrics().queued, 0);
}

#[test]
fn test_rejected_task_can_be_resubmitted() -> anyhow::Result<()> {
    let pool = ThreadPool::new();
    let counter = Arc::new(AtomicUsize::new(0));

    let rejected = pool.submit(counting_task(&counter)).unwrap_err().into_inner();

    pool.initialize(1)?;
    pool.start()?;
    pool.submit(rejected).unwrap();
    pool.stop()?;

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn test_submit_after_stop_is_rejected() -> anyhow::Result<()> {
    let pool = started_pool(2)?;
    pool.stop()?;

    let counter = Arc::new(AtomicUsize::new(0));
    assert!(pool.submit(counting_task(&counter)).is_err());
    assert_eq!(pool.state(), PoolState::Stopped);
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn test_thousand_tasks_drain() -> anyhow::Result<()> {
    let pool = ThreadPool::new();
    pool.initialize(4)?;
    pool.start()?;

    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..1000 {
        pool.submit(counting_task(&counter)).unwrap();
    }

    let report = pool.stop()?;
    assert_eq!(counter.load(Ordering::SeqCst), 1000);
    assert_eq!(report, ShutdownReport { workers_joined: 4, discarded: 0 });

    let metrics = pool.metrics();
    assert_eq!(metrics.executed, 1000);
    assert_eq!(metrics.failed, 0);
    assert_eq!(metrics.queued, 0);
    assert_eq!(metrics.state, PoolState::Stopped);
    Ok(())
}

#[test]
fn test_drain_runs_tasks_queued_behind_a_slow_one() -> anyhow::Result<()> {
    let pool = started_pool(1)?;
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    pool.submit(move || {
        started_tx.send(()).unwrap();
        release_rx.recv().unwrap();
    })
    .unwrap();
    started_rx.recv_timeout(DEFAULT_WAIT)?;

    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..10 {
        pool.submit(counting_task(&counter)).unwrap();
    }

    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        release_tx.send(()).unwrap();
    });

    let report = pool.stop()?;
    releaser.join().unwrap();

    assert_eq!(report.discarded, 0);
    assert_eq!(counter.load(Ordering::SeqCst), 10);
    Ok(())
}

#[test]
fn test_discard_policy_drops_queued_tasks() -> anyhow::Result<()> {
    let pool = started_pool_with(PoolConfig {
        shutdown_policy: ShutdownPolicy::Discard,
        ..PoolConfig::with_threads(1)
    })?;
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    pool.submit(move || {
        started_tx.send(()).unwrap();
        release_rx.recv().unwrap();
    })
    .unwrap();
    started_rx.recv_timeout(DEFAULT_WAIT)?;

    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..10 {
        pool.submit(counting_task(&counter)).unwrap();
    }

    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        release_tx.send(()).unwrap();
    });

    let report = pool.stop()?;
    releaser.join().unwrap();

    assert_eq!(report, ShutdownReport { workers_joined: 1, discarded: 10 });
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(pool.metrics().executed, 1);
    Ok(())
}

#[test]
fn test_discard_accounting_is_exact() -> anyhow::Result<()> {
    let pool = started_pool_with(PoolConfig {
        shutdown_policy: ShutdownPolicy::Discard,
        ..PoolConfig::with_threads(4)
    })?;

    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..1000 {
        pool.submit(counting_task(&counter)).unwrap();
    }

    let report = pool.stop()?;
    assert_eq!(counter.load(Ordering::SeqCst) + report.discarded, 1000);
    Ok(())
}

#[test]
fn test_no_task_runs_after_stop_returns() -> anyhow::Result<()> {
    let pool = started_pool(4)?;
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..200 {
        let counter = counter.clone();
        pool.submit(move || {
            thread::sleep(Duration::from_micros(100));
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }

    pool.stop()?;
    let after_stop = counter.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(50));

    assert_eq!(after_stop, 200);
    assert_eq!(counter.load(Ordering::SeqCst), after_stop);
    assert_eq!(pool.metrics().active, 0);
    Ok(())
}

#[test]
fn test_stop_is_idempotent() -> anyhow::Result<()> {
    let pool = started_pool(3)?;

    assert_eq!(pool.stop()?.workers_joined, 3);
    assert_eq!(pool.stop()?, ShutdownReport::default());
    assert_eq!(pool.state(), PoolState::Stopped);

    let never_started = ThreadPool::new();
    assert_eq!(never_started.stop()?, ShutdownReport::default());
    assert_eq!(never_started.state(), PoolState::Created);
    Ok(())
}

#[test]
fn test_restart_after_reinitialize() -> anyhow::Result<()> {
    let pool = started_pool(2)?;
    let counter = Arc::new(AtomicUsize::new(0));

    pool.submit(counting_task(&counter)).unwrap();
    pool.stop()?;

    assert_eq!(pool.start(), Err(PoolError::NotInitialized));

    pool.initialize(3)?;
    pool.start()?;
    for _ in 0..5 {
        pool.submit(counting_task(&counter)).unwrap();
    }
    let report = pool.stop()?;

    assert_eq!(report.workers_joined, 3);
    assert_eq!(counter.load(Ordering::SeqCst), 6);
    Ok(())
}

#[test]
fn test_workers_run_concurrently_up_to_pool_size() -> anyhow::Result<()> {
    let pool = started_pool(4)?;
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    for _ in 0..40 {
        let running = running.clone();
        let peak = peak.clone();
        pool.submit(move || {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(5));
            running.fetch_sub(1, Ordering::SeqCst);
        })
        .unwrap();
    }

    pool.stop()?;
    let peak = peak.load(Ordering::SeqCst);
    assert!((1..=4).contains(&peak), "peak concurrency was {}", peak);
    Ok(())
}

#[test]
fn test_single_worker_executes_in_submission_order() -> anyhow::Result<()> {
    let pool = started_pool(1)?;
    let order = Arc::new(Mutex::new(Vec::new()));

    for i in 0..50 {
        let order = order.clone();
        pool.submit(move || order.lock().unwrap().push(i)).unwrap();
    }
    pool.stop()?;

    assert_eq!(*order.lock().unwrap(), (0..50).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn test_worker_threads_are_named() -> anyhow::Result<()> {
    let pool = started_pool_with(PoolConfig {
        thread_name_prefix: "indexer".to_string(),
        ..PoolConfig::with_threads(1)
    })?;
    let (tx, rx) = mpsc::channel();

    pool.submit(move || {
        tx.send(thread::current().name().map(str::to_string)).unwrap();
    })
    .unwrap();

    let name = rx.recv_timeout(DEFAULT_WAIT)?.expect("worker thread has a name");
    let short_id = pool.id().simple().to_string();
    assert_eq!(name, format!("indexer-{}-0", &short_id[..8]));
    Ok(())
}

#[test]
fn test_failures_do_not_kill_workers() -> anyhow::Result<()> {
    let (tx, rx) = flume::unbounded::<TaskFailure>();
    let pool = ThreadPool::with_config(PoolConfig::with_threads(1)).with_failure_sink(tx);
    pool.initialize(1)?;
    pool.start()?;

    let counter = Arc::new(AtomicUsize::new(0));
    pool.submit(task::named("explodes", explode)).unwrap();
    pool.submit(task::named("refuses", task::fallible(|| anyhow::bail!("bad input")))).unwrap();
    pool.submit(counting_task(&counter)).unwrap();
    pool.stop()?;

    // The single worker survived both failures and ran the last task
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    let failures: Vec<TaskFailure> = rx.try_iter().collect();
    assert_eq!(failures.len(), 2);

    assert_eq!(failures[0].task_name, "explodes");
    assert_eq!(failures[0].worker_id, 0);
    assert_eq!(failures[0].pool_id, pool.id());
    assert!(matches!(&failures[0].error, TaskError::Panicked(msg) if msg == "kaboom"));

    assert_eq!(failures[1].task_name, "refuses");
    assert!(matches!(&failures[1].error, TaskError::Failed(e) if e.to_string() == "bad input"));

    let metrics = pool.metrics();
    assert_eq!(metrics.failed, 2);
    assert_eq!(metrics.executed, 1);
    Ok(())
}

#[test]
fn test_closure_failure_sink() -> anyhow::Result<()> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink_seen = seen.clone();
    let pool = ThreadPool::with_config(PoolConfig::with_threads(2)).with_failure_sink(
        move |failure: TaskFailure| sink_seen.lock().unwrap().push(failure.to_string()),
    );
    pool.initialize(2)?;
    pool.start()?;

    pool.submit(task::named("flaky", task::fallible(|| anyhow::bail!("timed out")))).unwrap();
    pool.stop()?;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].starts_with("task 'flaky' on worker"));
    assert!(seen[0].ends_with("failed: Task failed: timed out"));
    Ok(())
}

#[test]
fn test_panicking_sink_does_not_kill_worker() -> anyhow::Result<()> {
    let pool = ThreadPool::with_config(PoolConfig::with_threads(1))
        .with_failure_sink(broken_sink);
    pool.initialize(1)?;
    pool.start()?;

    let counter = Arc::new(AtomicUsize::new(0));
    pool.submit(task::fallible(|| anyhow::bail!("first"))).unwrap();
    pool.submit(counting_task(&counter)).unwrap();
    pool.stop()?;

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn test_concurrent_producers() -> anyhow::Result<()> {
    let pool = started_pool(4)?;
    let counter = Arc::new(AtomicUsize::new(0));

    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..250 {
                    pool.submit(counting_task(&counter)).unwrap();
                }
            });
        }
    });

    pool.stop()?;
    assert_eq!(counter.load(Ordering::SeqCst), 1000);
    Ok(())
}

#[test]
fn test_submissions_racing_stop_are_never_lost() -> anyhow::Result<()> {
    let pool = started_pool(3)?;
    let counter = Arc::new(AtomicUsize::new(0));
    let accepted = AtomicUsize::new(0);

    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                while pool.submit(counting_task(&counter)).is_ok() {
                    accepted.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        thread::sleep(Duration::from_millis(5));
        pool.stop().unwrap();
    });

    assert!(accepted.load(Ordering::SeqCst) > 0);
    assert_eq!(counter.load(Ordering::SeqCst), accepted.load(Ordering::SeqCst));
    Ok(())
}

#[test]
fn test_task_can_submit_follow_up_work() -> anyhow::Result<()> {
    let pool = Arc::new(started_pool(2)?);
    let (tx, rx) = mpsc::channel();

    let inner_pool = pool.clone();
    pool.submit(move || {
        inner_pool
            .submit(move || tx.send("follow-up").unwrap())
            .unwrap();
    })
    .unwrap();

    assert_eq!(rx.recv_timeout(DEFAULT_WAIT)?, "follow-up");
    pool.stop()?;
    Ok(())
}

#[test]
fn test_stop_from_inside_a_task() -> anyhow::Result<()> {
    let pool = Arc::new(started_pool(2)?);
    let (tx, rx) = mpsc::channel();

    let inner_pool = pool.clone();
    pool.submit(move || {
        tx.send(inner_pool.stop()).unwrap();
    })
    .unwrap();

    let report = rx.recv_timeout(DEFAULT_WAIT)??;
    assert_eq!(report.workers_joined, 1);
    assert_eq!(pool.state(), PoolState::Stopped);
    Ok(())
}

#[test]
fn test_restart_after_stop_from_inside_a_task() -> anyhow::Result<()> {
    let pool = Arc::new(started_pool(1)?);
    let (report_tx, report_rx) = mpsc::channel();
    let old_task_done = Arc::new(AtomicBool::new(false));

    let inner_pool = pool.clone();
    let done = old_task_done.clone();
    pool.submit(move || {
        report_tx.send(inner_pool.stop()).unwrap();
        thread::sleep(Duration::from_millis(100));
        done.store(true, Ordering::SeqCst);
    })
    .unwrap();

    report_rx.recv_timeout(DEFAULT_WAIT)??;
    assert_eq!(pool.state(), PoolState::Stopped);

    pool.initialize(1)?;
    pool.start()?;
    assert!(
        old_task_done.load(Ordering::SeqCst),
        "start returned while the previous worker was still running"
    );

    let counter = Arc::new(AtomicUsize::new(0));
    pool.submit(counting_task(&counter)).unwrap();
    let report = pool.stop()?;

    assert_eq!(report.workers_joined, 1);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn test_concurrent_stop_waits_for_workers() -> anyhow::Result<()> {
    let pool = started_pool(1)?;
    let finished = Arc::new(AtomicBool::new(false));
    let (started_tx, started_rx) = mpsc::channel();

    let done = finished.clone();
    pool.submit(move || {
        started_tx.send(()).unwrap();
        thread::sleep(Duration::from_millis(300));
        done.store(true, Ordering::SeqCst);
    })
    .unwrap();
    started_rx.recv_timeout(DEFAULT_WAIT)?;

    let stop_and_observe = || {
        let report = pool.stop();
        (report, finished.load(Ordering::SeqCst), pool.state())
    };

    let outcomes = thread::scope(|s| {
        let first = s.spawn(stop_and_observe);
        thread::sleep(Duration::from_millis(50));
        let second = s.spawn(stop_and_observe);
        [first.join().unwrap(), second.join().unwrap()]
    });

    let mut workers_joined = 0;
    for (report, task_finished, state) in outcomes {
        workers_joined += report?.workers_joined;
        assert!(task_finished, "stop returned while a task was still running");
        assert_eq!(state, PoolState::Stopped);
    }
    assert_eq!(workers_joined, 1);
    Ok(())
}

#[test]
fn test_stop_from_a_task_during_shutdown_returns_immediately() -> anyhow::Result<()> {
    let pool = Arc::new(started_pool(1)?);
    let (tx, rx) = mpsc::channel();

    let inner_pool = pool.clone();
    pool.submit(move || {
        wait_until(DEFAULT_WAIT, || inner_pool.state() == PoolState::Stopping);
        tx.send(inner_pool.stop()).unwrap();
    })
    .unwrap();

    let report = pool.stop()?;
    assert_eq!(report.workers_joined, 1);
    assert_eq!(rx.recv_timeout(DEFAULT_WAIT)??, ShutdownReport::default());
    Ok(())
}

#[test]
fn test_drop_stops_and_drains() {
    let counter = Arc::new(AtomicUsize::new(0));

    {
        let pool = started_pool(2).unwrap();
        for _ in 0..100 {
            pool.submit(counting_task(&counter)).unwrap();
        }
    }

    assert_eq!(counter.load(Ordering::SeqCst), 100);
}

#[test]
fn test_metrics_while_running() -> anyhow::Result<()> {
    let pool = started_pool(1)?;
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    pool.submit(move || {
        started_tx.send(()).unwrap();
        release_rx.recv().unwrap();
    })
    .unwrap();
    started_rx.recv_timeout(DEFAULT_WAIT)?;

    let counter = Arc::new(AtomicUsize::new(0));
    pool.submit(counting_task(&counter)).unwrap();
    pool.submit(counting_task(&counter)).unwrap();

    let metrics = pool.metrics();
    assert_eq!(metrics.state, PoolState::Running);
    assert_eq!(metrics.pool_size, 1);
    assert_eq!(metrics.active, 1);
    assert_eq!(metrics.queued, 2);

    release_tx.send(())?;
    assert!(wait_until(DEFAULT_WAIT, || pool.metrics().executed == 3));
    assert_eq!(pool.metrics().queued, 0);
    pool.stop()?;
    Ok(())
}
