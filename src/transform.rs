//! Line-level text transforms applied to extractor output.
//!
//! Each stage inserts one `"key::value"` field right after the leading 10-digit timestamp
//! field of a record's first line. Stages are typed values, never shell text.

use anyhow::{bail, Result};
use std::borrow::Cow;

/// One injection stage: `"key::value"` after the timestamp field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldInjection {
    pub key: String,
    pub value: String,
}

impl FieldInjection {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self { key: key.into(), value: value.into() }
    }

    /// Parse a `key=value` directive. The key must be non-empty and must not contain
    /// characters that would break the exporter's quoting.
    pub fn parse(directive: &str) -> Result<Self> {
        let Some((k, v)) = directive.split_once('=') else {
            bail!("expected key=value");
        };
        let key = k.trim();
        if key.is_empty() {
            bail!("empty key");
        }
        if key.contains(['"', ',', '\n', ':']) || v.contains(['"', '\n']) {
            bail!("key/value must not contain quotes or newlines (and key no ',' or ':')");
        }
        Ok(Self::new(key, v.trim()))
    }

    /// Rendered field text, quotes included.
    pub fn field(&self) -> String {
        format!("\"{}::{}\"", self.key, self.value)
    }
}

/// True when `line` starts with ten ASCII digits.
#[inline]
pub fn has_timestamp_prefix(line: &str) -> bool {
    line.as_bytes()
        .get(..10)
        .is_some_and(|p| p.iter().all(u8::is_ascii_digit))
}

/// `<10 digits>,` at the start of `line`.
#[inline]
fn has_injection_point(line: &[u8]) -> bool {
    line.len() > 10 && line[..10].iter().all(u8::is_ascii_digit) && line[10] == b','
}

fn injected_fields(stages: &[FieldInjection]) -> String {
    // Each stage inserts directly after the timestamp, so later stages land first.
    stages.iter().rev().fold(String::new(), |mut acc, stage| {
        acc.push_str(&stage.field());
        acc.push(',');
        acc
    })
}

/// Apply `stages` in order to a single line. Only lines of the form `<10 digits>,...` are
/// touched; continuation lines and headers pass through borrowed.
pub fn apply_stages<'a>(stages: &[FieldInjection], line: &'a str) -> Cow<'a, str> {
    if stages.is_empty() || !has_injection_point(line.as_bytes()) {
        return Cow::Borrowed(line);
    }
    let (ts, rest) = line.split_at(11); // "<10 digits>,"
    let mut out = String::with_capacity(line.len() + stages.len() * 24);
    out.push_str(ts);
    out.push_str(&injected_fields(stages));
    out.push_str(rest);
    Cow::Owned(out)
}

/// Byte-level [`apply_stages`] for raw pass-through. Everything after the timestamp field,
/// line terminator and non-UTF-8 payload included, is kept exactly.
pub fn apply_stages_bytes<'a>(stages: &[FieldInjection], line: &'a [u8]) -> Cow<'a, [u8]> {
    if stages.is_empty() || !has_injection_point(line) {
        return Cow::Borrowed(line);
    }
    let fields = injected_fields(stages);
    let mut out = Vec::with_capacity(line.len() + fields.len());
    out.extend_from_slice(&line[..11]);
    out.extend_from_slice(fields.as_bytes());
    out.extend_from_slice(&line[11..]);
    Cow::Owned(out)
}

/// Owned variant of [`apply_stages`] for line streams; untouched lines are returned as-is.
pub fn apply_stages_owned(stages: &[FieldInjection], line: String) -> String {
    let injected = match apply_stages(stages, &line) {
        Cow::Owned(s) => Some(s),
        Cow::Borrowed(_) => None,
    };
    injected.unwrap_or(line)
}
