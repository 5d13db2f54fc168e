//! Output sinks.
//!
//! The target (network or file, and for files the format) is resolved once from
//! [`ExportOptions`] into a [`SinkTarget`]. Each task then opens its own sink handle, sends
//! its records, and closes it. Every handle releases its socket or file on drop, so error
//! paths need no extra cleanup; `close` exists to flush and to surface late errors.

use crate::catalog::BucketUnit;
use crate::config::{Compression, ExportOptions, FileFormat};
use crate::error::ExportError;
use crate::record::StructuredRecord;
use crate::util::create_with_backoff;
use flate2::write::GzEncoder;
use native_tls::{Certificate, TlsConnector, TlsStream};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;
use std::path::{Path, PathBuf};

/// Common contract of record-consuming sinks.
pub trait RecordSink: Send {
    /// Deliver one record. A failure abandons the rest of the task.
    fn send(&mut self, record: &StructuredRecord) -> Result<(), ExportError>;
    /// Flush and release the underlying handle.
    fn close(self: Box<Self>) -> Result<(), ExportError>;
}

// ----------------------------- Target selection ------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkTarget {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    /// Hostname check; may be off while TLS encryption stays on.
    pub verify_hostname: bool,
    pub accept_invalid_certs: bool,
    /// Extra PEM root to trust, for receivers behind a private CA.
    pub ca_file: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileTarget {
    pub dir: PathBuf,
    pub format: FileFormat,
    /// `Some((codec, level))` compresses JSON output. Ignored for raw output.
    pub compression: Option<(Compression, u32)>,
    pub write_buffer_bytes: usize,
}

impl FileTarget {
    /// `<dir>/<bucket-name>.csv`, `.json`, `.json.gz` or `.json.zst`.
    pub fn output_path(&self, bucket_name: &str) -> PathBuf {
        let file_name = match (self.format, self.compression) {
            (FileFormat::Raw, _) => format!("{bucket_name}.csv"),
            (FileFormat::Json, None) => format!("{bucket_name}.json"),
            (FileFormat::Json, Some((codec, _))) => format!("{bucket_name}.json.{}", codec.suffix()),
        };
        self.dir.join(file_name)
    }
}

/// Where this run's output goes. Chosen once, read-only afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkTarget {
    Network(NetworkTarget),
    File(FileTarget),
}

/// A per-task sink handle.
pub enum OpenSink {
    Records(Box<dyn RecordSink>),
    /// Raw pass-through of extractor lines; no reassembly.
    Raw(RawTextSink),
}

impl SinkTarget {
    pub fn from_options(opts: &ExportOptions) -> Self {
        if opts.file_out {
            let compression = opts
                .file_out_compress
                .then_some((opts.compression, opts.compression_level));
            SinkTarget::File(FileTarget {
                dir: opts.file_out_path.clone(),
                format: opts.file_out_type,
                compression,
                write_buffer_bytes: opts.write_buffer_bytes,
            })
        } else {
            SinkTarget::Network(NetworkTarget {
                host: opts.dest_host.clone(),
                port: opts.dest_port,
                tls: opts.tls,
                verify_hostname: opts.check_hostname,
                accept_invalid_certs: opts.accept_invalid_certs,
                ca_file: opts.tls_ca_file.clone(),
            })
        }
    }

    pub fn open(&self, bucket: &BucketUnit) -> Result<OpenSink, ExportError> {
        match self {
            SinkTarget::Network(t) => Ok(OpenSink::Records(Box::new(NetworkSink::connect(t)?))),
            SinkTarget::File(t) => {
                let path = t.output_path(&bucket.name);
                match t.format {
                    FileFormat::Raw => Ok(OpenSink::Raw(RawTextSink::create(&path, t.write_buffer_bytes)?)),
                    FileFormat::Json => Ok(OpenSink::Records(Box::new(JsonFileSink::create(
                        &path,
                        t.compression,
                        t.write_buffer_bytes,
                    )?))),
                }
            }
        }
    }
}

impl fmt::Display for SinkTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkTarget::Network(t) => write!(
                f,
                "network {}:{} (tls={}, check_hostname={})",
                t.host, t.port, t.tls, t.verify_hostname
            ),
            SinkTarget::File(t) => {
                let compressed = match t.compression {
                    Some((codec, level)) => format!("{codec:?} level {level}"),
                    None => "no".to_string(),
                };
                write!(f, "file {} (format={:?}, compressed={})", t.dir.display(), t.format, compressed)
            }
        }
    }
}

// ----------------------------- Network ------------------------------------

/// How long `close` waits for the receiver's EOF after our FIN.
const CLOSE_LINGER: Duration = Duration::from_millis(250);

/// Send FIN, then drain whatever the receiver still sends until its EOF (or the linger
/// expires). Closing with unread input would make the kernel answer with a reset.
fn half_close(s: &TcpStream) -> io::Result<()> {
    s.shutdown(Shutdown::Write)?;
    s.set_read_timeout(Some(CLOSE_LINGER))?;
    let mut scratch = [0u8; 4096];
    let mut rd = s;
    loop {
        match rd.read(&mut scratch) {
            Ok(0) => return Ok(()),
            Ok(_) => continue,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            // Timed out or reset after our data was handed over; nothing left to deliver.
            Err(_) => return Ok(()),
        }
    }
}

enum NetStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Write for NetStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            NetStream::Plain(s) => s.write(buf),
            NetStream::Tls(s) => s.write(buf),
        }
    }
    fn flush(&mut self) -> io::Result<()> {
        match self {
            NetStream::Plain(s) => s.flush(),
            NetStream::Tls(s) => s.flush(),
        }
    }
}

/// Newline-delimited JSON over TCP, optionally inside TLS.
pub struct NetworkSink {
    stream: NetStream,
    target: String,
    buf: Vec<u8>,
}

impl NetworkSink {
    pub fn connect(t: &NetworkTarget) -> Result<Self, ExportError> {
        let target = format!("{}:{}", t.host, t.port);
        let connect_err = |source: io::Error| ExportError::SinkConnect { target: target.clone(), source };

        let tcp = TcpStream::connect((t.host.as_str(), t.port)).map_err(connect_err)?;
        let _ = tcp.set_nodelay(true);
        let stream = if t.tls {
            let mut builder = TlsConnector::builder();
            builder
                .danger_accept_invalid_hostnames(!t.verify_hostname)
                .danger_accept_invalid_certs(t.accept_invalid_certs);
            if let Some(ca) = &t.ca_file {
                let pem = fs::read(ca).map_err(connect_err)?;
                let cert = Certificate::from_pem(&pem).map_err(|e| connect_err(io::Error::other(e.to_string())))?;
                builder.add_root_certificate(cert);
            }
            let connector = builder
                .build()
                .map_err(|e| connect_err(io::Error::other(e.to_string())))?;
            let tls = connector
                .connect(&t.host, tcp)
                .map_err(|e| connect_err(io::Error::other(e.to_string())))?;
            NetStream::Tls(Box::new(tls))
        } else {
            NetStream::Plain(tcp)
        };
        tracing::debug!(%target, tls = t.tls, "sink connected");
        Ok(Self { stream, target, buf: Vec::with_capacity(8 * 1024) })
    }
}

impl RecordSink for NetworkSink {
    fn send(&mut self, record: &StructuredRecord) -> Result<(), ExportError> {
        self.buf.clear();
        let write_err = |source: io::Error| ExportError::SinkWrite { target: self.target.clone(), source };
        record.write_json_line(&mut self.buf).map_err(|e| write_err(e.into()))?;
        // One record per call; write_all loops over short writes.
        self.stream.write_all(&self.buf).map_err(write_err)
    }

    fn close(self: Box<Self>) -> Result<(), ExportError> {
        let NetworkSink { stream, target, .. } = *self;
        let close_err = |source: io::Error| ExportError::SinkClose { target: target.clone(), source };
        let res = match stream {
            NetStream::Plain(mut s) => s.flush().and_then(|_| half_close(&s)),
            NetStream::Tls(mut s) => s.flush().and_then(|_| s.shutdown()).and_then(|_| half_close(s.get_ref())),
        };
        match res {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(close_err(e)),
            _ => Ok(()),
        }
    }
}

// ----------------------------- Files ------------------------------------

fn create_output(path: &Path, buf_bytes: usize) -> Result<BufWriter<File>, ExportError> {
    let connect_err = |source: io::Error| ExportError::SinkConnect { target: path.display().to_string(), source };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(connect_err)?;
    }
    let f = create_with_backoff(path, 16, 50).map_err(connect_err)?;
    Ok(BufWriter::with_capacity(buf_bytes.max(8 * 1024), f))
}

enum Encoded {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
    Zstd(zstd::stream::write::Encoder<'static, BufWriter<File>>),
}

impl Encoded {
    fn finish(self) -> io::Result<()> {
        match self {
            Encoded::Plain(mut w) => w.flush(),
            Encoded::Gzip(enc) => enc.finish()?.flush(),
            Encoded::Zstd(enc) => enc.finish()?.flush(),
        }
    }
}

impl Write for Encoded {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Encoded::Plain(w) => w.write(buf),
            Encoded::Gzip(w) => w.write(buf),
            Encoded::Zstd(w) => w.write(buf),
        }
    }
    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encoded::Plain(w) => w.flush(),
            Encoded::Gzip(w) => w.flush(),
            Encoded::Zstd(w) => w.flush(),
        }
    }
}

/// JSON lines to a per-bucket file, optionally gzip or zstd compressed.
pub struct JsonFileSink {
    out: Encoded,
    path: PathBuf,
    buf: Vec<u8>,
}

impl JsonFileSink {
    pub fn create(path: &Path, compression: Option<(Compression, u32)>, buf_bytes: usize) -> Result<Self, ExportError> {
        let w = create_output(path, buf_bytes)?;
        let out = match compression {
            None => Encoded::Plain(w),
            Some((Compression::Gzip, level)) => {
                Encoded::Gzip(GzEncoder::new(w, flate2::Compression::new(level.min(9))))
            }
            Some((Compression::Zstd, level)) => {
                let max = *zstd::compression_level_range().end();
                let level = i32::try_from(level).map_or(max, |l| l.min(max));
                let enc = zstd::stream::write::Encoder::new(w, level).map_err(|source| {
                    ExportError::SinkConnect { target: path.display().to_string(), source }
                })?;
                Encoded::Zstd(enc)
            }
        };
        Ok(Self { out, path: path.to_path_buf(), buf: Vec::with_capacity(8 * 1024) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSink for JsonFileSink {
    fn send(&mut self, record: &StructuredRecord) -> Result<(), ExportError> {
        self.buf.clear();
        let write_err = |source: io::Error| ExportError::SinkWrite { target: self.path.display().to_string(), source };
        record.write_json_line(&mut self.buf).map_err(|e| write_err(e.into()))?;
        self.out.write_all(&self.buf).map_err(write_err)
    }

    fn close(self: Box<Self>) -> Result<(), ExportError> {
        let JsonFileSink { out, path, .. } = *self;
        out.finish()
            .map_err(|source| ExportError::SinkClose { target: path.display().to_string(), source })
    }
}

/// Extractor bytes written through unchanged (apart from injection stages).
pub struct RawTextSink {
    w: BufWriter<File>,
    path: PathBuf,
}

impl RawTextSink {
    pub fn create(path: &Path, buf_bytes: usize) -> Result<Self, ExportError> {
        Ok(Self { w: create_output(path, buf_bytes)?, path: path.to_path_buf() })
    }

    /// Write `bytes` as given; the caller keeps the extractor's own line terminators.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<(), ExportError> {
        self.w
            .write_all(bytes)
            .map_err(|source| ExportError::SinkWrite { target: self.path.display().to_string(), source })
    }

    pub fn close(mut self) -> Result<(), ExportError> {
        self.w
            .flush()
            .map_err(|source| ExportError::SinkClose { target: self.path.display().to_string(), source })
    }
}
