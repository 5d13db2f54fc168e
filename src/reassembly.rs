//! Record reassembly over the extractor's line stream.
//!
//! The exporter prints one logical event over one or more physical lines. A line whose
//! first ten characters are digits (the epoch timestamp) starts a new event; every other
//! line continues the current one. Header and diagnostic lines are dropped up front.

use crate::record::{StructuredRecord, STANDARD_KEYS};
use crate::transform::has_timestamp_prefix;
use regex::Regex;
use std::io;
use std::sync::OnceLock;

/// First line of the exporter's CSV output.
pub const EXPORT_HEADER: &str = r#""_time",source,host,sourcetype,"_raw","_meta""#;
/// Printed by the splunk launcher on stderr, which is merged into the stream.
pub const DIAGNOSTIC_MARKER: &str = "log-cmdline.cfg";

#[inline]
pub fn is_noise(line: &str) -> bool {
    line == EXPORT_HEADER || line.contains(DIAGNOSTIC_MARKER)
}

/// Groups lines into raw record buffers (lines joined with `\n`).
///
/// Holds at most one record in memory. Once the inner stream is exhausted (or fails) the
/// pending buffer is flushed and the iterator is fused.
pub struct LineReassembler<I> {
    lines: I,
    pending: Option<String>,
    ended: bool,
}

impl<I> LineReassembler<I>
where
    I: Iterator<Item = io::Result<String>>,
{
    pub fn new(lines: I) -> Self {
        Self { lines, pending: None, ended: false }
    }
}

impl<I> Iterator for LineReassembler<I>
where
    I: Iterator<Item = io::Result<String>>,
{
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.ended {
            return None;
        }
        loop {
            match self.lines.next() {
                Some(Ok(line)) => {
                    if is_noise(&line) {
                        continue;
                    }
                    if has_timestamp_prefix(&line) {
                        if let Some(done) = self.pending.replace(line) {
                            return Some(Ok(done));
                        }
                        continue;
                    }
                    match self.pending.as_mut() {
                        Some(buf) => {
                            buf.push('\n');
                            buf.push_str(&line);
                        }
                        None => self.pending = Some(line),
                    }
                }
                Some(Err(e)) => {
                    self.ended = true;
                    self.pending = None;
                    return Some(Err(e));
                }
                None => {
                    self.ended = true;
                    return self.pending.take().map(Ok);
                }
            }
        }
    }
}

fn record_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?s)^(\d+),((?:"[^"\n]*::[^"\n]*",)*?)"source::(.*?)","host::(.*?)","sourcetype::(.*?)","(.*?)","_indextime::"#,
        )
        .expect("static record pattern")
    })
}

fn injected_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""([^"\n]*?)::([^"\n]*)""#).expect("static field pattern"))
}

/// Parse one raw record buffer. `None` when the buffer doesn't have the exporter's shape.
pub fn parse_record(buf: &str, index: &str) -> Option<StructuredRecord> {
    let caps = record_pattern().captures(buf)?;
    let fields: Vec<(String, String)> = caps
        .get(2)
        .map(|m| {
            injected_pattern()
                .captures_iter(m.as_str())
                .map(|c| (c[1].to_string(), c[2].to_string()))
                .filter(|(k, _)| !STANDARD_KEYS.contains(&k.as_str()))
                .collect()
        })
        .unwrap_or_default();
    Some(StructuredRecord {
        time: caps[1].to_string(),
        source: caps[3].to_string(),
        host: caps[4].to_string(),
        sourcetype: caps[5].to_string(),
        raw: caps[6].to_string(),
        index: index.to_string(),
        fields,
    })
}

/// Lazy stream of parsed records. Buffers that fail to parse are logged, counted and
/// skipped; read errors end the stream.
pub struct Records<I> {
    inner: LineReassembler<I>,
    index: String,
    label: String,
    parse_failures: u64,
}

impl<I> Records<I>
where
    I: Iterator<Item = io::Result<String>>,
{
    /// `index` is stamped on every record; `label` identifies the stream in warnings.
    pub fn new(lines: I, index: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            inner: LineReassembler::new(lines),
            index: index.into(),
            label: label.into(),
            parse_failures: 0,
        }
    }

    pub fn parse_failures(&self) -> u64 {
        self.parse_failures
    }
}

impl<I> Iterator for Records<I>
where
    I: Iterator<Item = io::Result<String>>,
{
    type Item = io::Result<StructuredRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let buf = match self.inner.next()? {
                Ok(b) => b,
                Err(e) => return Some(Err(e)),
            };
            if let Some(rec) = parse_record(&buf, &self.index) {
                return Some(Ok(rec));
            }
            self.parse_failures += 1;
            let preview: String = buf.chars().take(120).collect();
            tracing::warn!(stream = %self.label, preview = %preview, "dropping record that does not match the export layout");
        }
    }
}
