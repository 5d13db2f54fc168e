//! File open/create with retry and linear backoff on transient errors.
//!
//! Many workers open output files at once; running out of descriptors or hitting a busy
//! NFS/SmartStore cache volume should slow a worker down, not fail its bucket.

use std::fs::File;
use std::io;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

/// Transient errors worth another attempt.
fn is_retriable_io_error(e: &io::Error) -> bool {
    if matches!(e.kind(), io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock) {
        return true;
    }
    // EAGAIN(11) EBUSY(16) ENFILE(23) EMFILE(24) ETXTBSY(26) on Linux.
    cfg!(unix) && matches!(e.raw_os_error(), Some(11 | 16 | 23 | 24 | 26))
}

fn with_backoff<T>(tries: usize, delay_ms: u64, what: &str, mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    let mut last_err: Option<io::Error> = None;
    for i in 0..tries.max(1) {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if is_retriable_io_error(&e) => {
                tracing::debug!(attempt = i + 1, error = %e, "{what}: transient error, backing off");
                last_err = Some(e);
                sleep(Duration::from_millis(delay_ms.saturating_mul((i + 1) as u64)));
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| io::Error::other(format!("{what} failed"))))
}

/// Open a file for reading, retrying transient failures.
pub fn open_with_backoff(path: &Path, tries: usize, delay_ms: u64) -> io::Result<File> {
    with_backoff(tries, delay_ms, "open", || File::open(path))
}

/// Create (truncate) a file, retrying transient failures.
pub fn create_with_backoff(path: &Path, tries: usize, delay_ms: u64) -> io::Result<File> {
    with_backoff(tries, delay_ms, "create", || File::create(path))
}
