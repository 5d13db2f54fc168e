//! One task, start to finish: open the sink, run the extractor, stream its output through
//! the reassembler into the sink, then reap the process.

use crate::error::ExportError;
use crate::extract::ExtractionProcess;
use crate::reassembly::{Records, DIAGNOSTIC_MARKER};
use crate::sink::{OpenSink, RecordSink, SinkTarget};
use crate::tasks::ExtractionTask;
use crate::transform::{apply_stages_bytes, apply_stages_owned};
use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Outcome of a single bucket.
#[derive(Debug)]
pub struct TaskReport {
    pub bucket: PathBuf,
    pub elapsed: Duration,
    /// Records delivered (raw mode: timestamped lines written).
    pub records: u64,
    pub parse_failures: u64,
    pub error: Option<ExportError>,
}

impl TaskReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Default)]
struct Counts {
    records: u64,
    parse_failures: u64,
}

/// Run `task` against `target`. Never panics on task-level failures; they end up in the
/// report.
pub fn run_task(task: &ExtractionTask, target: &SinkTarget, read_buf_bytes: usize) -> TaskReport {
    let start = Instant::now();
    let mut counts = Counts::default();
    let result = drive(task, target, read_buf_bytes, &mut counts);
    let elapsed = start.elapsed();

    match &result {
        Ok(()) => tracing::info!(
            bucket = %task.bucket.path.display(),
            records = counts.records,
            parse_failures = counts.parse_failures,
            "{:7.2} seconds to process: {}",
            elapsed.as_secs_f64(),
            task.bucket.path.display()
        ),
        Err(e) => tracing::error!(
            bucket = %task.bucket.path.display(),
            kind = e.kind(),
            records = counts.records,
            "task failed after {:.2}s: {e}",
            elapsed.as_secs_f64()
        ),
    }

    TaskReport {
        bucket: task.bucket.path.clone(),
        elapsed,
        records: counts.records,
        parse_failures: counts.parse_failures,
        error: result.err(),
    }
}

fn drive(task: &ExtractionTask, target: &SinkTarget, read_buf_bytes: usize, counts: &mut Counts) -> Result<(), ExportError> {
    // Sink first: an unreachable destination should not cost an extractor run.
    let sink = target.open(&task.bucket)?;
    let mut process = ExtractionProcess::spawn(&task.command)?;

    let stages = &task.command.stages;

    match sink {
        OpenSink::Records(mut sink) => {
            let lines = process
                .lines(read_buf_bytes)
                .map(|line| line.map(|l| apply_stages_owned(stages, l)));
            let mut records = Records::new(lines, task.bucket.index_name.clone(), task.bucket.path.display().to_string());
            let pumped = pump(&mut records, sink.as_mut(), counts);
            counts.parse_failures = records.parse_failures();
            pumped?;
            sink.close()?;
        }
        OpenSink::Raw(mut sink) => {
            for line in process.raw_lines(read_buf_bytes) {
                let line = line.map_err(ExportError::Read)?;
                if is_diagnostic(&line) {
                    continue;
                }
                let out = apply_stages_bytes(stages, &line);
                sink.write_raw(&out)?;
                if line.get(..10).is_some_and(|p| p.iter().all(u8::is_ascii_digit)) {
                    counts.records += 1;
                }
            }
            sink.close()?;
        }
    }

    process.finish(&task.bucket.path)
}

fn is_diagnostic(line: &[u8]) -> bool {
    let marker = DIAGNOSTIC_MARKER.as_bytes();
    line.windows(marker.len()).any(|w| w == marker)
}

fn pump<I>(records: &mut Records<I>, sink: &mut dyn RecordSink, counts: &mut Counts) -> Result<(), ExportError>
where
    I: Iterator<Item = io::Result<String>>,
{
    for rec in records {
        let rec = rec.map_err(ExportError::Read)?;
        sink.send(&rec)?;
        counts.records += 1;
    }
    Ok(())
}
