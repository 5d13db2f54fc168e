//! Bucket selection predicates: window overlap plus the name/path exclusions.

use crate::catalog::BucketUnit;
use crate::window::EpochWindow;

/// Path marker for buckets an admin has taken offline.
pub const DISABLED_MARKER: &str = "DISABLED";
/// Cluster replicated copies; the origin copy is exported from its own peer.
pub const REPLICATED_PREFIX: &str = "rb_";
/// Hot buckets are still being written.
pub const HOT_PREFIX: &str = "hot";
/// Warm/cold origin buckets.
pub const DB_PREFIX: &str = "db_";

/// Why a candidate was rejected. Only used for debug logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    Disabled,
    Replicated,
    Hot,
    NotDb,
    OutsideWindow,
}

#[derive(Clone, Copy, Debug)]
pub struct BucketFilter {
    pub window: EpochWindow,
    pub only_db: bool,
}

impl BucketFilter {
    pub fn new(window: EpochWindow) -> Self {
        Self { window, only_db: false }
    }

    pub fn only_db(mut self, yes: bool) -> Self {
        self.only_db = yes;
        self
    }

    /// Exclusions are checked before the window: a disabled, replicated or hot bucket is
    /// never selected no matter how well its range overlaps.
    pub fn check(&self, unit: &BucketUnit) -> Result<(), Rejection> {
        if unit.path.to_string_lossy().contains(DISABLED_MARKER) {
            return Err(Rejection::Disabled);
        }
        if unit.name.starts_with(REPLICATED_PREFIX) {
            return Err(Rejection::Replicated);
        }
        if unit.name.starts_with(HOT_PREFIX) {
            return Err(Rejection::Hot);
        }
        if self.only_db && !unit.name.starts_with(DB_PREFIX) {
            return Err(Rejection::NotDb);
        }
        if !self.window.overlaps(unit.min_time, unit.max_time) {
            return Err(Rejection::OutsideWindow);
        }
        Ok(())
    }

    #[inline]
    pub fn accepts(&self, unit: &BucketUnit) -> bool {
        self.check(unit).is_ok()
    }
}
