use anyhow::{Context, Result};
use bucketflow::{init_logging, BucketExport, ExportOptions, ExportPlan, RunSummary};
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

/// Export index buckets overlapping a time window and stream their events to a TCP/TLS
/// receiver or to per-bucket files.
///
/// Options come from a TOML file (`--config`); flags below override individual keys.
///
///   bucketflow -c export.toml
///   bucketflow -c export.toml --earliest 1564819155 --latest 1566429310 -n 4 --kv env=prod
#[derive(Parser, Debug)]
#[command(name = "bucketflow", version, about, long_about = None)]
struct Cli {
    /// TOML options file
    #[arg(short, long, env = "BUCKETFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Index directory to walk for buckets
    #[arg(short, long)]
    directory: Option<PathBuf>,

    /// Earliest epoch second of the window
    #[arg(long, allow_negative_numbers = true)]
    earliest: Option<i64>,

    /// Latest epoch second of the window
    #[arg(long, allow_negative_numbers = true)]
    latest: Option<i64>,

    /// Number of concurrent extractions
    #[arg(short = 'n', long)]
    num_streams: Option<usize>,

    /// Extra key=value field injected into every event (repeatable)
    #[arg(long = "kv", value_name = "KEY=VALUE")]
    kv: Vec<String>,

    /// Tag every event with its bucket name
    #[arg(short = 'b', long)]
    bucket_name: bool,

    /// Append the run log to this file
    #[arg(short = 'l', long)]
    log_file: Option<PathBuf>,

    /// Don't ask for confirmation before exporting
    #[arg(short, long)]
    yes: bool,

    /// Print the plan and exit
    #[arg(long)]
    dry_run: bool,

    /// Disable the progress bar
    #[arg(long)]
    no_progress: bool,
}

fn load_options(cli: &Cli) -> Result<ExportOptions> {
    let mut opts = match &cli.config {
        Some(p) => ExportOptions::from_toml_file(p)?,
        None => ExportOptions::default(),
    };
    if let Some(d) = &cli.directory {
        opts = opts.with_directory(d);
    }
    if let Some(e) = cli.earliest {
        opts.earliest = e;
    }
    if let Some(l) = cli.latest {
        opts.latest = l;
    }
    if let Some(n) = cli.num_streams {
        opts = opts.with_num_streams(n);
    }
    opts.extra_fields.extend(cli.kv.iter().cloned());
    if cli.bucket_name {
        opts = opts.with_bucket_name_tag(true);
    }
    if let Some(l) = &cli.log_file {
        opts = opts.with_logfile(l);
    }
    if cli.no_progress {
        opts = opts.with_progress(false);
    }
    Ok(opts)
}

fn print_plan(plan: &ExportPlan) {
    let rule = "-".repeat(25);
    println!("{rule}");
    println!("processing {} buckets", plan.tasks().len());
    println!("{rule}");
    for t in plan.tasks() {
        println!("{}", t.bucket.path.display());
    }
    println!("{rule}");
    println!("Chosen Configuration:");
    println!("Output = {}", plan.target());
    println!("Max Concurrent Processes = {}", plan.options().num_streams.max(1));
    println!("{rule}");
    println!();
}

fn confirm() -> Result<bool> {
    print!("Getting ready to process the above list, with displayed configuration. Continue? (y/n): ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer).context("read confirmation")?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}

fn print_summary(summary: &RunSummary) {
    println!(
        "Completed processing in {:.2}s: {} matched, {} attempted, {} succeeded, {} failed, {} records ({} unparseable)",
        summary.elapsed.as_secs_f64(),
        summary.matched,
        summary.attempted,
        summary.succeeded,
        summary.failed,
        summary.records,
        summary.parse_failures
    );
    for r in summary.failures() {
        if let Some(e) = &r.error {
            println!("  FAILED {}: {e}", r.bucket.display());
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let opts = load_options(&cli)?;
    init_logging(opts.logfile.as_deref())?;

    let plan = BucketExport::from_options(opts).plan()?;
    print_plan(&plan);
    if cli.dry_run {
        return Ok(ExitCode::SUCCESS);
    }
    if !cli.yes && !confirm()? {
        println!("Aborted; nothing exported.");
        return Ok(ExitCode::SUCCESS);
    }

    let strict = plan.options().strict_exit;
    let summary = plan.run()?;
    print_summary(&summary);

    if strict && summary.failed > 0 {
        Ok(ExitCode::from(2))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
