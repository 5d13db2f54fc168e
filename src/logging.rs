//! Tracing setup: `RUST_LOG`-style filter (default `info`) to stderr, optionally teed into an
//! append-only run log.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Arc, Once};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

static INIT_ONCE: Once = Once::new();

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. When `logfile` is set, events are appended to it as well.
///
/// Returns whether this call installed the subscriber. Later calls (and calls after another
/// subscriber was installed) change nothing; a log file passed to such a call is reported
/// with a warning and not written.
pub fn init_logging(logfile: Option<&Path>) -> Result<bool> {
    let file = match logfile {
        Some(p) => Some(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(p)
                .with_context(|| format!("open log file {}", p.display()))?,
        ),
        None => None,
    };
    let mut installed = false;
    INIT_ONCE.call_once(|| {
        let res = match file {
            Some(f) => tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_ansi(false)
                .with_writer(std::io::stderr.and(Arc::new(f)))
                .try_init(),
            None => tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_writer(std::io::stderr)
                .try_init(),
        };
        installed = res.is_ok();
    });
    if !installed {
        if let Some(p) = logfile {
            tracing::warn!(log_file = %p.display(), "logging was already initialized; not writing to this log file");
        }
    }
    Ok(installed)
}

/// Library entry points call this so events go somewhere even without a binary.
pub fn init_tracing_once() {
    let _ = init_logging(None);
}
