//! Bounded worker pool: exactly `concurrency` threads pull tasks until the list is drained.
//! A failing task only affects its own report.

use crate::progress::ProgressScope;
use crate::sink::SinkTarget;
use crate::tasks::ExtractionTask;
use crate::worker::{run_task, TaskReport};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use rayon::prelude::*;
use std::time::{Duration, Instant};

/// What a run did.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Buckets selected by discovery.
    pub matched: usize,
    /// Tasks handed to the pool.
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub records: u64,
    pub parse_failures: u64,
    pub elapsed: Duration,
    /// In completion order.
    pub reports: Vec<TaskReport>,
}

impl RunSummary {
    pub fn failures(&self) -> impl Iterator<Item = &TaskReport> {
        self.reports.iter().filter(|r| !r.succeeded())
    }
}

/// Run every task with at most `concurrency` in flight (minimum 1).
///
/// Tasks go to whichever worker frees up first; completion order is unspecified. Each
/// finished task ticks `progress` and prints its timing line above the bar.
pub fn run_tasks(
    tasks: &[ExtractionTask],
    concurrency: usize,
    target: &SinkTarget,
    read_buf_bytes: usize,
    progress: Option<&ProgressScope>,
) -> Result<RunSummary> {
    let workers = concurrency.max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("bucketflow-worker-{i}"))
        .build()
        .context("build worker pool")?;

    tracing::info!(tasks = tasks.len(), workers, sink = %target, "dispatching");
    let start = Instant::now();
    let reports = Mutex::new(Vec::with_capacity(tasks.len()));

    pool.install(|| {
        // One task per split, so an idle worker steals the next bucket rather than a batch.
        tasks.par_iter().with_max_len(1).for_each(|task| {
            let report = run_task(task, target, read_buf_bytes);
            if let Some(p) = progress {
                p.println(format!(
                    "{:7.2} seconds to process: {}{}",
                    report.elapsed.as_secs_f64(),
                    report.bucket.display(),
                    if report.succeeded() { "" } else { " (FAILED)" }
                ));
                p.inc_items(1);
            }
            reports.lock().push(report);
        });
    });

    let reports = reports.into_inner();
    let succeeded = reports.iter().filter(|r| r.succeeded()).count();
    Ok(RunSummary {
        matched: tasks.len(),
        attempted: tasks.len(),
        succeeded,
        failed: reports.len() - succeeded,
        records: reports.iter().map(|r| r.records).sum(),
        parse_failures: reports.iter().map(|r| r.parse_failures).sum(),
        elapsed: start.elapsed(),
        reports,
    })
}
