#![allow(dead_code)]

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Window used by most tests: 2019-08-03 .. 2019-08-21.
pub const EARLIEST: i64 = 1_564_819_155;
pub const LATEST: i64 = 1_566_429_310;

pub const HEADER: &str = r#""_time",source,host,sourcetype,"_raw","_meta""#;

/// Create `<base>/<index>/<sub>/<bucket>/<max>-<min>-1.tsidx` and return the bucket dir.
pub fn make_bucket(base: &Path, index: &str, sub: &str, bucket: &str, max: i64, min: i64) -> PathBuf {
    let dir = base.join(index).join(sub).join(bucket);
    fs::create_dir_all(&dir).unwrap();
    File::create(dir.join(format!("{max}-{min}-1.tsidx"))).unwrap();
    dir
}

/// Extra data file inside an existing bucket dir.
pub fn add_data_file(bucket: &Path, max: i64, min: i64, id: u32) {
    File::create(bucket.join(format!("{max}-{min}-{id}.tsidx"))).unwrap();
}

/// One exporter record line (single physical line).
pub fn export_line(time: i64, host: &str, raw: &str) -> String {
    format!(
        r#"{time},"source::/var/log/app.log","host::{host}","sourcetype::app:log","{raw}","_indextime::{} linecount::1""#,
        time + 1
    )
}

/// Header, one single-line record and one record whose payload spans two lines.
pub fn sample_export(host: &str) -> Vec<String> {
    vec![
        HEADER.to_string(),
        export_line(1_564_820_000, host, "user login ok"),
        format!(r#"1564820005,"source::/var/log/app.log","host::{host}","sourcetype::app:log","stack trace begins"#),
        r#"   at frame two","_indextime::1564820006 linecount::2""#.to_string(),
    ]
}

/// What the fake extractor prints for `bucket`.
pub fn write_export(bucket: &Path, lines: &[String]) {
    let mut text = lines.join("\n");
    text.push('\n');
    fs::write(bucket.join("export.csv"), text).unwrap();
}

/// Exact bytes for the fake extractor to print for `bucket`.
pub fn write_export_bytes(bucket: &Path, bytes: &[u8]) {
    fs::write(bucket.join("export.csv"), bytes).unwrap();
}

/// Lines printed before a one-second pause, ahead of `export.csv`.
pub fn write_export_head(bucket: &Path, lines: &[String]) {
    let mut text = lines.join("\n");
    text.push('\n');
    fs::write(bucket.join("head.csv"), text).unwrap();
}

/// Make the fake extractor exit non-zero for `bucket` after printing nothing.
pub fn mark_failing(bucket: &Path) {
    File::create(bucket.join("fail")).unwrap();
}

/// Shell stand-in for `splunk cmd exporttool <bucket> /dev/stdout -csv`: prints a launcher
/// diagnostic on stderr, then `<bucket>/head.csv` (if any) and a pause, then
/// `<bucket>/export.csv` on stdout.
pub fn write_fake_extractor(dir: &Path) -> PathBuf {
    let script = dir.join("fake_exporttool.sh");
    fs::write(
        &script,
        "#!/bin/sh\n\
         echo \"WARNING: unable to read log-cmdline.cfg\" >&2\n\
         if [ -f \"$1/fail\" ]; then exit 3; fi\n\
         [ \"$2\" = \"/dev/stdout\" ] || exit 4\n\
         [ \"$3\" = \"-csv\" ] || exit 5\n\
         if [ -f \"$1/head.csv\" ]; then cat \"$1/head.csv\"; sleep 1; fi\n\
         cat \"$1/export.csv\"\n",
    )
    .unwrap();
    script
}

/// Invoked through `/bin/sh` so the script never needs an exec bit.
pub fn fake_extractor_argv(script: &Path) -> Vec<String> {
    vec!["/bin/sh".to_string(), script.display().to_string()]
}

pub fn read_lines(path: &Path) -> Vec<String> {
    let f = File::open(path).unwrap();
    BufReader::new(f).lines().map(|l| l.unwrap()).filter(|s| !s.is_empty()).collect()
}

/// Read a JSONL stream into values (skips empty lines).
pub fn parse_jsonl(text: &str) -> Vec<serde_json::Value> {
    text.lines()
        .filter(|s| !s.is_empty())
        .map(|s| serde_json::from_str(s).unwrap())
        .collect()
}

pub fn read_jsonl_values(path: &Path) -> Vec<serde_json::Value> {
    parse_jsonl(&fs::read_to_string(path).unwrap())
}

/// In-memory line source for the reassembler.
pub fn ok_lines(lines: &[&str]) -> impl Iterator<Item = std::io::Result<String>> {
    lines.iter().map(|l| Ok(l.to_string())).collect::<Vec<_>>().into_iter()
}
