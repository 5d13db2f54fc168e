//! Extractor subprocess handling: spawn with stdout and stderr merged into one pipe, read
//! it line by line, and make sure the child is always reaped.

use crate::error::ExportError;
use crate::tasks::CommandSpec;
use std::io::{self, BufRead, BufReader, PipeReader, Read};
use std::process::{Child, Stdio};

/// Lossy UTF-8 line iterator with `\r?\n` trimmed.
pub struct OutputLines<R> {
    rdr: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: Read> OutputLines<R> {
    pub fn new(inner: R, buf_bytes: usize) -> Self {
        Self {
            rdr: BufReader::with_capacity(buf_bytes.max(8 * 1024), inner),
            buf: Vec::with_capacity(4 * 1024),
        }
    }
}

impl<R: Read> Iterator for OutputLines<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buf.clear();
        match self.rdr.read_until(b'\n', &mut self.buf) {
            Ok(0) => None,
            Ok(_) => {
                if self.buf.ends_with(b"\n") {
                    self.buf.pop();
                    if self.buf.ends_with(b"\r") {
                        self.buf.pop();
                    }
                }
                Some(Ok(String::from_utf8_lossy(&self.buf).into_owned()))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

/// Byte lines exactly as read, terminator included; the last line may lack one.
pub struct RawLines<R> {
    rdr: BufReader<R>,
}

impl<R: Read> RawLines<R> {
    pub fn new(inner: R, buf_bytes: usize) -> Self {
        Self { rdr: BufReader::with_capacity(buf_bytes.max(8 * 1024), inner) }
    }
}

impl<R: Read> Iterator for RawLines<R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut line = Vec::new();
        match self.rdr.read_until(b'\n', &mut line) {
            Ok(0) => None,
            Ok(_) => Some(Ok(line)),
            Err(e) => Some(Err(e)),
        }
    }
}

/// A running extractor. Dropping it without [`ExtractionProcess::finish`] kills and reaps
/// the child, so abandoning the output early never leaves a blocked writer behind.
pub struct ExtractionProcess {
    child: Child,
    output: Option<PipeReader>,
    program: String,
    reaped: bool,
}

impl ExtractionProcess {
    pub fn spawn(spec: &CommandSpec) -> Result<Self, ExportError> {
        let launch = |source: io::Error| ExportError::Launch { program: spec.program.clone(), source };

        let (reader, writer) = io::pipe().map_err(launch)?;
        let stderr_end = writer.try_clone().map_err(launch)?;

        let mut cmd = spec.command();
        cmd.stdin(Stdio::null()).stdout(writer).stderr(stderr_end);
        let child = cmd.spawn().map_err(launch)?;
        // The command still owns our copies of the write end; EOF only arrives once they close.
        drop(cmd);

        tracing::debug!(pid = child.id(), program = %spec.program, "extractor started");
        Ok(Self { child, output: Some(reader), program: spec.program.clone(), reaped: false })
    }

    fn take_output(&mut self) -> Box<dyn Read + Send> {
        match self.output.take() {
            Some(r) => Box::new(r),
            None => Box::new(io::empty()),
        }
    }

    /// Take the merged output stream as text lines. Subsequent calls (of either reader)
    /// return an empty stream.
    pub fn lines(&mut self, buf_bytes: usize) -> OutputLines<Box<dyn Read + Send>> {
        OutputLines::new(self.take_output(), buf_bytes)
    }

    /// Take the merged output stream as untouched byte lines.
    pub fn raw_lines(&mut self, buf_bytes: usize) -> RawLines<Box<dyn Read + Send>> {
        RawLines::new(self.take_output(), buf_bytes)
    }

    /// Close our end of the pipe, wait for exit and map a non-zero status to an error.
    pub fn finish(mut self, bucket: &std::path::Path) -> Result<(), ExportError> {
        self.output = None;
        let status = self.child.wait().map_err(ExportError::Read)?;
        self.reaped = true;
        if status.success() {
            Ok(())
        } else {
            tracing::debug!(program = %self.program, %status, "extractor failed");
            Err(ExportError::ExtractorExit { bucket: bucket.to_path_buf(), status: status.to_string() })
        }
    }
}

impl Drop for ExtractionProcess {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        self.output = None;
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
