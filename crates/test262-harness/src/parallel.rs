//! Worker pool for the runner.
//!
//! A feeder thread pushes cases into a bounded crossbeam channel, N named
//! workers execute them, and outcomes travel back over a second channel to
//! the calling thread, which is the only writer of the [`Summary`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::metadata::TestCase;
use crate::report::Summary;
use crate::runner::{Cancellation, Outcome, TestExecutor, execute_case};

/// Run `cases` across `num_jobs` worker threads and collect the summary.
///
/// Blocks until every case has been classified or the run was cancelled.
pub(crate) fn run_parallel<I, E>(
    cases: I,
    executor: &E,
    num_jobs: usize,
    cancellation: &Cancellation,
) -> Summary
where
    I: IntoIterator<Item = TestCase>,
    I::IntoIter: Send,
    E: TestExecutor + ?Sized,
{
    let num_jobs = num_jobs.max(1);
    // Bounded channels keep the feeder from reading the whole corpus ahead
    let (job_tx, job_rx) = bounded::<TestCase>(num_jobs * 4);
    let (result_tx, result_rx) = bounded::<(Outcome, TestCase)>(num_jobs * 8);
    let stopped_early = AtomicBool::new(false);
    let started = Instant::now();

    tracing::info!(workers = num_jobs, "Starting test262 run");

    let mut summary = Summary::default();
    thread::scope(|scope| {
        let stopped_early = &stopped_early;

        let mut workers = 0;
        for i in 0..num_jobs {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("test262-worker-{i}"))
                .spawn_scoped(scope, move || {
                    worker_main(job_rx, result_tx, executor, cancellation, stopped_early)
                });
            match spawned {
                Ok(_) => workers += 1,
                Err(e) => tracing::warn!("Failed to spawn worker thread {}: {}", i, e),
            }
        }

        // The channels close once every worker has dropped its copies
        drop(job_rx);
        drop(result_tx);

        if workers == 0 {
            tracing::warn!("No worker threads could be started, running on the calling thread");
            run_inline(cases, executor, cancellation, stopped_early, &mut summary);
            return;
        }

        let cases = cases.into_iter();
        let feeder = thread::Builder::new()
            .name("test262-feeder".to_string())
            .spawn_scoped(scope, move || feed(cases, job_tx, cancellation, stopped_early));
        if let Err(e) = feeder {
            tracing::error!("Failed to spawn the feeder thread: {}", e);
            stopped_early.store(true, Ordering::SeqCst);
        }

        for (outcome, case) in &result_rx {
            summary.record(outcome, case);
        }
    });

    summary.cancelled = stopped_early.load(Ordering::SeqCst);
    summary.finish();

    tracing::info!(
        total = summary.total(),
        cancelled = summary.cancelled,
        "Finished test262 run in {:?}",
        started.elapsed()
    );
    summary
}

/// Push cases to the workers until the input ends or the run stops
fn feed<I>(
    cases: I,
    job_tx: Sender<TestCase>,
    cancellation: &Cancellation,
    stopped_early: &AtomicBool,
) where
    I: Iterator<Item = TestCase>,
{
    for case in cases {
        if cancellation.is_cancelled() {
            stopped_early.store(true, Ordering::SeqCst);
            break;
        }
        if job_tx.send(case).is_err() {
            tracing::warn!("All workers exited before the input was exhausted");
            stopped_early.store(true, Ordering::SeqCst);
            break;
        }
    }
}

/// Sequential fallback when no worker thread is available
fn run_inline<I, E>(
    cases: I,
    executor: &E,
    cancellation: &Cancellation,
    stopped_early: &AtomicBool,
    summary: &mut Summary,
) where
    I: IntoIterator<Item = TestCase>,
    E: TestExecutor + ?Sized,
{
    for case in cases {
        if cancellation.is_cancelled() {
            stopped_early.store(true, Ordering::SeqCst);
            break;
        }
        let outcome = execute_case(executor, &case);
        summary.record(outcome, case);
    }
}

fn worker_main<E>(
    job_rx: Receiver<TestCase>,
    result_tx: Sender<(Outcome, TestCase)>,
    executor: &E,
    cancellation: &Cancellation,
    stopped_early: &AtomicBool,
) where
    E: TestExecutor + ?Sized,
{
    for case in &job_rx {
        if cancellation.is_cancelled() {
            stopped_early.store(true, Ordering::SeqCst);
            break;
        }

        let outcome = execute_case(executor, &case);
        if result_tx.send((outcome, case)).is_err() {
            break; // collector disconnected
        }
    }
}
