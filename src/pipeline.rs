use crate::catalog::{self, BucketUnit};
use crate::config::{Compression, ExportOptions, FileFormat};
use crate::filters::BucketFilter;
use crate::logging::init_tracing_once;
use crate::progress::ProgressScope;
use crate::scheduler::{run_tasks, RunSummary};
use crate::sink::SinkTarget;
use crate::tasks::{ExtractionTask, TaskBuilder};
use anyhow::{bail, Result};
use std::path::Path;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Entry point: configure, `plan()`, inspect, then `run()`.
#[derive(Clone, Debug, Default)]
pub struct BucketExport {
    pub(crate) opts: ExportOptions,
}

impl BucketExport {
    pub fn new() -> Self {
        Self { opts: ExportOptions::default() }
    }

    pub fn from_options(opts: ExportOptions) -> Self {
        Self { opts }
    }

    pub fn options(&self) -> &ExportOptions {
        &self.opts
    }

    // -------- Builder methods --------
    pub fn directory(mut self, dir: impl AsRef<Path>) -> Self { self.opts = self.opts.with_directory(dir); self }
    pub fn import_buckets<I, P>(mut self, buckets: I) -> Self where I: IntoIterator<Item = P>, P: AsRef<Path> { self.opts = self.opts.with_import_buckets(buckets); self }
    pub fn import_buckets_file(mut self, path: impl AsRef<Path>) -> Self { self.opts = self.opts.with_import_buckets_file(path); self }
    pub fn window(mut self, earliest: i64, latest: i64) -> Self { self.opts = self.opts.with_window(earliest, latest); self }
    pub fn only_db(mut self, yes: bool) -> Self { self.opts = self.opts.with_only_db(yes); self }
    pub fn num_streams(mut self, n: usize) -> Self { self.opts = self.opts.with_num_streams(n); self }
    pub fn extract_command<I, S>(mut self, argv: I) -> Self where I: IntoIterator<Item = S>, S: Into<String> { self.opts = self.opts.with_extract_command(argv); self }
    pub fn extra_field(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self { self.opts = self.opts.with_extra_field(key, value); self }
    pub fn tag_bucket_name(mut self, yes: bool) -> Self { self.opts = self.opts.with_bucket_name_tag(yes); self }
    pub fn network(mut self, host: impl Into<String>, port: u16) -> Self { self.opts = self.opts.with_network(host, port); self }
    pub fn tls(mut self, enabled: bool, check_hostname: bool) -> Self { self.opts = self.opts.with_tls(enabled, check_hostname); self }
    pub fn tls_trust(mut self, ca_file: Option<&Path>, accept_invalid_certs: bool) -> Self { self.opts = self.opts.with_tls_trust(ca_file, accept_invalid_certs); self }
    pub fn file_output(mut self, dir: impl AsRef<Path>, format: FileFormat) -> Self { self.opts = self.opts.with_file_output(dir, format); self }
    pub fn compression(mut self, enabled: bool, codec: Compression) -> Self { self.opts = self.opts.with_compression(enabled, codec); self }
    pub fn progress(mut self, yes: bool) -> Self { self.opts = self.opts.with_progress(yes); self }

    /// Validate the window, discover buckets and build tasks. Nothing is executed and no
    /// output is opened; an invalid window fails here.
    pub fn plan(self) -> Result<ExportPlan> {
        init_tracing_once();
        let opts = self.opts;

        let started = OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default();
        tracing::info!("{}", "-".repeat(25));
        tracing::info!(%started, streams = opts.num_streams, "starting a new export");
        tracing::debug!(options = ?opts, "export options");

        let window = opts.window();
        if let Err(e) = window.validate() {
            tracing::error!("search window rejected: {e}");
            return Err(e.into());
        }
        tracing::info!(%window, "search window accepted");

        let mut explicit = opts.import_buckets.clone();
        if let Some(list) = &opts.import_buckets_file {
            explicit.extend(catalog::load_bucket_list(list)?);
        }
        if explicit.is_empty() && opts.directory.is_none() {
            bail!("either `directory` or an explicit bucket list is required");
        }

        let filter = BucketFilter::new(window).only_db(opts.only_db);
        let buckets = catalog::discover(opts.directory.as_deref(), &explicit, &filter, opts.index_depth);
        tracing::info!("{} buckets match the search criteria", buckets.len());
        for b in &buckets {
            tracing::info!(index = %b.index_name, min = b.min_time, max = b.max_time, "selected {}", b.path.display());
        }

        let tasks = TaskBuilder::new(opts.extractor_argv())
            .static_fields(opts.static_fields()?)
            .tag_bucket_name(opts.bucket_name)
            .build(&buckets);
        let target = SinkTarget::from_options(&opts);

        Ok(ExportPlan { opts, buckets, tasks, target })
    }

    /// `plan()` followed by `run()`.
    pub fn run(self) -> Result<RunSummary> {
        self.plan()?.run()
    }
}

/// Discovered buckets, built tasks and the resolved sink, ready to run.
#[derive(Debug)]
pub struct ExportPlan {
    opts: ExportOptions,
    buckets: Vec<BucketUnit>,
    tasks: Vec<ExtractionTask>,
    target: SinkTarget,
}

impl ExportPlan {
    pub fn buckets(&self) -> &[BucketUnit] {
        &self.buckets
    }

    pub fn tasks(&self) -> &[ExtractionTask] {
        &self.tasks
    }

    pub fn target(&self) -> &SinkTarget {
        &self.target
    }

    pub fn options(&self) -> &ExportOptions {
        &self.opts
    }

    /// Run every task on the bounded pool and summarize.
    pub fn run(self) -> Result<RunSummary> {
        if self.tasks.is_empty() {
            tracing::warn!("no buckets matched; nothing to export");
        }
        let pb = self
            .opts
            .progress
            .then(|| ProgressScope::count("Exporting buckets", self.tasks.len() as u64));

        let mut summary = run_tasks(&self.tasks, self.opts.num_streams, &self.target, self.opts.read_buffer_bytes, pb.as_ref())?;
        summary.matched = self.buckets.len();

        if let Some(pb) = pb {
            pb.finish("done");
        }

        for r in summary.failures() {
            if let Some(e) = &r.error {
                tracing::warn!(bucket = %r.bucket.display(), kind = e.kind(), "failed: {e}");
            }
        }
        tracing::info!(
            matched = summary.matched,
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            failed = summary.failed,
            records = summary.records,
            parse_failures = summary.parse_failures,
            "completed processing in {:.2}s",
            summary.elapsed.as_secs_f64()
        );
        Ok(summary)
    }
}
