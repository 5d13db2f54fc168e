mod config;
mod error;
mod window;
mod util;

mod catalog;
mod filters;
mod transform;
mod tasks;

mod extract;
mod record;
mod reassembly;
mod sink;

mod logging;
mod progress;
mod worker;
mod scheduler;
mod pipeline;

pub use crate::config::{Compression, ExportOptions, FileFormat};
pub use crate::error::ExportError;
pub use crate::window::EpochWindow;
pub use crate::pipeline::{BucketExport, ExportPlan};

// discovery & filtering
pub use crate::catalog::{bucket_dir_range, data_file_range, discover, index_name_for, load_bucket_list, BucketUnit};
pub use crate::filters::{BucketFilter, Rejection};

// task building & line transforms
pub use crate::tasks::{CommandSpec, ExtractionTask, TaskBuilder, FORMAT_FLAG, OUTPUT_TARGET};
pub use crate::transform::{apply_stages, apply_stages_bytes, has_timestamp_prefix, FieldInjection};

// reassembly
pub use crate::record::StructuredRecord;
pub use crate::reassembly::{is_noise, parse_record, LineReassembler, Records, DIAGNOSTIC_MARKER, EXPORT_HEADER};
pub use crate::extract::{ExtractionProcess, OutputLines, RawLines};

// sinks
pub use crate::sink::{FileTarget, JsonFileSink, NetworkSink, NetworkTarget, OpenSink, RawTextSink, RecordSink, SinkTarget};

// scheduling
pub use crate::scheduler::{run_tasks, RunSummary};
pub use crate::worker::{run_task, TaskReport};

// ambient
pub use crate::logging::{init_logging, init_tracing_once};
pub use crate::progress::ProgressScope;
