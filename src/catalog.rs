//! Bucket discovery: walk an index directory for `*.tsidx` data files (or take an explicit
//! list), derive each bucket's time range from names, filter, and dedup by bucket directory.

use crate::filters::BucketFilter;
use crate::util::open_with_backoff;
use anyhow::{Context, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use walkdir::WalkDir;

/// Extension of the per-bucket time-series index files.
pub const DATA_FILE_EXT: &str = "tsidx";

/// One exportable bucket directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BucketUnit {
    pub path: PathBuf,
    pub name: String,
    pub index_name: String,
    pub min_time: i64,
    pub max_time: i64,
}

/// `<max>-<min>-<id>.tsidx` → `(max, min)`. The time tokens are the third- and
/// second-from-last `-` separated fields, so prefixes with extra dashes still parse.
pub fn data_file_range(file_name: &str) -> Option<(i64, i64)> {
    let mut tokens = file_name.rsplit('-');
    tokens.next()?; // "<id>.tsidx"
    let min = tokens.next()?.parse::<i64>().ok()?;
    let max = tokens.next()?.parse::<i64>().ok()?;
    Some((max, min))
}

/// `db_<max>_<min>_<id>[_<guid>]` (or `rb_...`) → `(max, min)`.
pub fn bucket_dir_range(dir_name: &str) -> Option<(i64, i64)> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"^(?:db|rb)_(\d+)_(\d+)_\d+").expect("static bucket name pattern")
    });
    let caps = re.captures(dir_name)?;
    let max = caps[1].parse::<i64>().ok()?;
    let min = caps[2].parse::<i64>().ok()?;
    Some((max, min))
}

fn file_name_str(p: &Path) -> Option<&str> {
    p.file_name().and_then(OsStr::to_str)
}

/// Name of the ancestor `depth` levels above the bucket directory.
/// With the default depth of 2 this is `<index>` in `<index>/db/<bucket>`.
pub fn index_name_for(bucket: &Path, depth: usize) -> String {
    bucket
        .ancestors()
        .nth(depth)
        .and_then(file_name_str)
        .unwrap_or_default()
        .to_string()
}

fn unit(path: PathBuf, name: String, (max_time, min_time): (i64, i64), depth: usize) -> Option<BucketUnit> {
    if min_time > max_time {
        return None;
    }
    let index_name = index_name_for(&path, depth);
    Some(BucketUnit { path, name, index_name, min_time, max_time })
}

/// Candidate from a data file: the bucket is the file's parent directory.
pub fn unit_from_data_file(file: &Path, depth: usize) -> Option<BucketUnit> {
    let range = data_file_range(file_name_str(file)?)?;
    let dir = file.parent()?;
    let name = file_name_str(dir)?.to_string();
    unit(dir.to_path_buf(), name, range, depth)
}

/// Candidate from a bucket directory whose own name carries the range.
pub fn unit_from_bucket_dir(dir: &Path, depth: usize) -> Option<BucketUnit> {
    let name = file_name_str(dir)?;
    let range = bucket_dir_range(name)?;
    unit(dir.to_path_buf(), name.to_string(), range, depth)
}

fn unit_from_entry(entry: &Path, depth: usize) -> Option<BucketUnit> {
    if entry.extension() == Some(OsStr::new(DATA_FILE_EXT)) {
        unit_from_data_file(entry, depth)
    } else {
        unit_from_bucket_dir(entry, depth)
    }
}

/// Read a newline-separated bucket list. Blank lines and `#` comments are ignored.
pub fn load_bucket_list(path: &Path) -> Result<Vec<PathBuf>> {
    let f = open_with_backoff(path, 16, 50)
        .with_context(|| format!("open bucket list {}", path.display()))?;
    let mut out = Vec::new();
    for line in BufReader::new(f).lines() {
        let line = line.with_context(|| format!("read bucket list {}", path.display()))?;
        let t = line.trim();
        if t.is_empty() || t.starts_with('#') {
            continue;
        }
        out.push(PathBuf::from(t));
    }
    Ok(out)
}

/// Discover and filter buckets.
///
/// A non-empty `explicit` list is used verbatim (no walk). Otherwise every `*.tsidx` under
/// `root` is a candidate. Names that don't parse are skipped. The result is deduplicated by
/// bucket directory and sorted by path, so the same tree always yields the same order.
pub fn discover(
    root: Option<&Path>,
    explicit: &[PathBuf],
    filter: &BucketFilter,
    index_depth: usize,
) -> Vec<BucketUnit> {
    let mut selected: BTreeMap<PathBuf, BucketUnit> = BTreeMap::new();
    let mut seen = 0usize;
    let mut malformed = 0usize;

    let mut consider = |candidate: Option<BucketUnit>, origin: &Path| {
        seen += 1;
        let Some(u) = candidate else {
            malformed += 1;
            tracing::debug!(path = %origin.display(), "skipping entry with unparseable time range");
            return;
        };
        if let Err(why) = filter.check(&u) {
            tracing::debug!(bucket = %u.path.display(), reason = ?why, "bucket not selected");
            return;
        }
        selected
            .entry(u.path.clone())
            .and_modify(|prev| {
                prev.min_time = prev.min_time.min(u.min_time);
                prev.max_time = prev.max_time.max(u.max_time);
            })
            .or_insert(u);
    };

    if !explicit.is_empty() {
        for entry in explicit {
            consider(unit_from_entry(entry, index_depth), entry);
        }
    } else if let Some(root) = root {
        for entry in WalkDir::new(root).follow_links(true) {
            let ent = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::debug!(error = %e, "walk error, continuing");
                    continue;
                }
            };
            if !ent.file_type().is_file() || ent.path().extension() != Some(OsStr::new(DATA_FILE_EXT)) {
                continue;
            }
            consider(unit_from_data_file(ent.path(), index_depth), ent.path());
        }
    }

    tracing::debug!(candidates = seen, malformed, selected = selected.len(), "discovery finished");
    selected.into_values().collect()
}
