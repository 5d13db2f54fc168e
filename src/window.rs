use crate::error::ExportError;
use std::fmt;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Requested export window in epoch seconds. Both bounds are inclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EpochWindow {
    pub earliest: i64,
    pub latest: i64,
}

impl EpochWindow {
    pub fn new(earliest: i64, latest: i64) -> Self {
        Self { earliest, latest }
    }

    /// `earliest` must be strictly below `latest`; anything else is a fatal configuration error.
    pub fn validate(&self) -> Result<(), ExportError> {
        if self.earliest < self.latest {
            Ok(())
        } else {
            Err(ExportError::InvalidWindow { earliest: self.earliest, latest: self.latest })
        }
    }

    /// Interval overlap with a bucket's `[min_time, max_time]`.
    /// Partial overlap qualifies; containment is not required.
    #[inline]
    pub fn overlaps(&self, min_time: i64, max_time: i64) -> bool {
        self.earliest <= max_time && self.latest >= min_time
    }
}

fn human(ts: i64) -> String {
    OffsetDateTime::from_unix_timestamp(ts)
        .ok()
        .and_then(|dt| dt.format(&Rfc3339).ok())
        .unwrap_or_else(|| "out of range".to_string())
}

impl fmt::Display for EpochWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{} ({} .. {})",
            self.earliest,
            self.latest,
            human(self.earliest),
            human(self.latest)
        )
    }
}
