use serde::ser::{Serialize, SerializeMap, Serializer};

/// One reassembled event, ready for a sink.
///
/// Serializes as a flat JSON object: `time, source, host, sourcetype, raw, index`, followed
/// by injected fields in injection order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StructuredRecord {
    pub time: String,
    pub source: String,
    pub host: String,
    pub sourcetype: String,
    pub raw: String,
    pub index: String,
    pub fields: Vec<(String, String)>,
}

pub const STANDARD_KEYS: [&str; 6] = ["time", "source", "host", "sourcetype", "raw", "index"];

impl Serialize for StructuredRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(STANDARD_KEYS.len() + self.fields.len()))?;
        map.serialize_entry("time", &self.time)?;
        map.serialize_entry("source", &self.source)?;
        map.serialize_entry("host", &self.host)?;
        map.serialize_entry("sourcetype", &self.sourcetype)?;
        map.serialize_entry("raw", &self.raw)?;
        map.serialize_entry("index", &self.index)?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl StructuredRecord {
    /// Append the newline-terminated JSON line for this record to `buf`.
    pub fn write_json_line(&self, buf: &mut Vec<u8>) -> serde_json::Result<()> {
        serde_json::to_writer(&mut *buf, self)?;
        buf.push(b'\n');
        Ok(())
    }
}
