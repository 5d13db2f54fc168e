//! Error classification for the export run.
//!
//! Only [`ExportError::InvalidWindow`] is fatal to a run. Everything else is scoped to the
//! task (bucket) it happened in and ends up in that task's [`crate::TaskReport`].

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("earliest ({earliest}) must be less than latest ({latest})")]
    InvalidWindow { earliest: i64, latest: i64 },

    #[error("failed to launch extractor `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("extractor exited with {status} for {bucket}")]
    ExtractorExit { bucket: PathBuf, status: String },

    #[error("failed reading extractor output: {0}")]
    Read(#[source] io::Error),

    #[error("cannot open sink {target}: {source}")]
    SinkConnect {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("write to sink {target} failed: {source}")]
    SinkWrite {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("closing sink {target} failed: {source}")]
    SinkClose {
        target: String,
        #[source]
        source: io::Error,
    },
}

impl ExportError {
    /// Short, stable label used in summaries and structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ExportError::InvalidWindow { .. } => "config",
            ExportError::Launch { .. } => "launch",
            ExportError::ExtractorExit { .. } => "extractor_exit",
            ExportError::Read(_) => "read",
            ExportError::SinkConnect { .. } => "sink_connect",
            ExportError::SinkWrite { .. } => "sink_write",
            ExportError::SinkClose { .. } => "sink_close",
        }
    }
}
