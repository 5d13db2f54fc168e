use crate::transform::FieldInjection;
use crate::window::EpochWindow;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// File output layout for the file sink.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    /// Native exporter text (CSV), one `<bucket>.csv` per bucket.
    #[serde(alias = "seo", alias = "csv")]
    Raw,
    /// Reassembled records as JSON lines, one `<bucket>.json` per bucket.
    #[default]
    #[serde(alias = "exo")]
    Json,
}

/// Block compressor used for JSON file output when `file_out_compress` is set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Gzip,
    Zstd,
}

impl Compression {
    pub fn suffix(self) -> &'static str {
        match self {
            Compression::Gzip => "gz",
            Compression::Zstd => "zst",
        }
    }
}

/// Run options with legacy-compatible defaults and builder chaining.
/// Loaded once (TOML or builder), then shared read-only by every component.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    pub splunk_home: PathBuf,
    /// Full extractor invocation prefix; overrides `<splunk_home>/bin/splunk cmd exporttool`.
    pub extract_command: Option<Vec<String>>,

    // selection
    pub directory: Option<PathBuf>,
    #[serde(alias = "explicit_bucket_list")]
    pub import_buckets: Vec<PathBuf>,
    pub import_buckets_file: Option<PathBuf>,
    pub earliest: i64,
    pub latest: i64,
    pub only_db: bool,
    pub index_depth: usize,           // ancestors between bucket dir and index dir

    // dispatch
    #[serde(alias = "concurrency")]
    pub num_streams: usize,
    pub extra_fields: Vec<String>,    // "key=value"
    #[serde(alias = "tag_bucket_name")]
    pub bucket_name: bool,

    // network sink
    pub dest_host: String,
    pub dest_port: u16,
    #[serde(alias = "tls_enabled")]
    pub tls: bool,
    #[serde(alias = "verify_hostname")]
    pub check_hostname: bool,
    pub accept_invalid_certs: bool,
    pub tls_ca_file: Option<PathBuf>,

    // file sink
    #[serde(alias = "file_output_enabled")]
    pub file_out: bool,
    #[serde(alias = "file_output_path")]
    pub file_out_path: PathBuf,
    #[serde(alias = "file_output_format")]
    pub file_out_type: FileFormat,
    #[serde(alias = "compress")]
    pub file_out_compress: bool,
    pub compression: Compression,
    pub compression_level: u32,

    // ambient
    pub logfile: Option<PathBuf>,
    pub progress: bool,
    pub strict_exit: bool,

    // IO tuning
    pub read_buffer_bytes: usize,
    pub write_buffer_bytes: usize,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            splunk_home: PathBuf::from("/opt/splunk"),
            extract_command: None,

            directory: None,
            import_buckets: Vec::new(),
            import_buckets_file: None,
            earliest: 0,
            latest: 9_999_999_999,
            only_db: false,
            index_depth: 2,

            num_streams: 2,
            extra_fields: Vec::new(),
            bucket_name: false,

            dest_host: "localhost".to_string(),
            dest_port: 10065,
            tls: false,
            check_hostname: true,
            accept_invalid_certs: false,
            tls_ca_file: None,

            file_out: false,
            file_out_path: PathBuf::from("."),
            file_out_type: FileFormat::Json,
            file_out_compress: false,
            compression: Compression::Gzip,
            compression_level: 5,

            logfile: None,
            progress: true,
            strict_exit: false,

            read_buffer_bytes: 64 * 1024,
            write_buffer_bytes: 256 * 1024,
        }
    }
}

impl FromStr for ExportOptions {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let opts: ExportOptions = toml::from_str(s).context("parse export options")?;
        Ok(opts)
    }
}

impl ExportOptions {
    /// Load options from a TOML file. Missing keys keep their defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        text.parse::<Self>()
            .with_context(|| format!("in config {}", path.display()))
    }

    pub fn with_directory(mut self, dir: impl AsRef<Path>) -> Self {
        self.directory = Some(dir.as_ref().to_path_buf());
        self
    }
    pub fn with_import_buckets<I, P>(mut self, buckets: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        self.import_buckets = buckets.into_iter().map(|p| p.as_ref().to_path_buf()).collect();
        self
    }
    pub fn with_import_buckets_file(mut self, path: impl AsRef<Path>) -> Self {
        self.import_buckets_file = Some(path.as_ref().to_path_buf());
        self
    }
    pub fn with_window(mut self, earliest: i64, latest: i64) -> Self {
        self.earliest = earliest;
        self.latest = latest;
        self
    }
    pub fn with_only_db(mut self, yes: bool) -> Self {
        self.only_db = yes;
        self
    }
    pub fn with_num_streams(mut self, n: usize) -> Self {
        self.num_streams = n.max(1);
        self
    }
    pub fn with_extract_command<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extract_command = Some(argv.into_iter().map(Into::into).collect());
        self
    }
    pub fn with_extra_field(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.extra_fields.push(format!("{}={}", key.as_ref(), value.as_ref()));
        self
    }
    pub fn with_bucket_name_tag(mut self, yes: bool) -> Self {
        self.bucket_name = yes;
        self
    }
    pub fn with_network(mut self, host: impl Into<String>, port: u16) -> Self {
        self.dest_host = host.into();
        self.dest_port = port;
        self.file_out = false;
        self
    }
    pub fn with_tls(mut self, enabled: bool, check_hostname: bool) -> Self {
        self.tls = enabled;
        self.check_hostname = check_hostname;
        self
    }
    /// Certificate policy on top of [`Self::with_tls`]: an extra trusted root and/or no chain
    /// validation at all.
    pub fn with_tls_trust(mut self, ca_file: Option<&Path>, accept_invalid_certs: bool) -> Self {
        self.tls_ca_file = ca_file.map(Path::to_path_buf);
        self.accept_invalid_certs = accept_invalid_certs;
        self
    }
    pub fn with_file_output(mut self, dir: impl AsRef<Path>, format: FileFormat) -> Self {
        self.file_out = true;
        self.file_out_path = dir.as_ref().to_path_buf();
        self.file_out_type = format;
        self
    }
    pub fn with_compression(mut self, enabled: bool, codec: Compression) -> Self {
        self.file_out_compress = enabled;
        self.compression = codec;
        self
    }
    pub fn with_logfile(mut self, path: impl AsRef<Path>) -> Self {
        self.logfile = Some(path.as_ref().to_path_buf());
        self
    }
    pub fn with_progress(mut self, yes: bool) -> Self {
        self.progress = yes;
        self
    }
    pub fn with_strict_exit(mut self, yes: bool) -> Self {
        self.strict_exit = yes;
        self
    }

    pub fn window(&self) -> EpochWindow {
        EpochWindow::new(self.earliest, self.latest)
    }

    /// Extractor argv prefix; the bucket path and output arguments are appended per task.
    pub fn extractor_argv(&self) -> Vec<String> {
        match &self.extract_command {
            Some(argv) if !argv.is_empty() => argv.clone(),
            _ => vec![
                self.splunk_home.join("bin").join("splunk").display().to_string(),
                "cmd".to_string(),
                "exporttool".to_string(),
            ],
        }
    }

    /// Static `key=value` injections in configuration order.
    pub fn static_fields(&self) -> Result<Vec<FieldInjection>> {
        self.extra_fields
            .iter()
            .map(|kv| FieldInjection::parse(kv).with_context(|| format!("extra_fields entry {kv:?}")))
            .collect()
    }
}
