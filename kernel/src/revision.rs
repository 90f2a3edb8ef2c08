// Revision Numbers
//
// A revision is a remote clock reading flattened to an integer:
// `YYYYMMDDHHMMSSffffff` at microsecond precision with the century
// digit dropped. Readings therefore sort in commit-time order.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::clock::ClockError;

/// Batch version shared by every record of one flush.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Revision(pub u64);

impl Revision {
    /// Not yet pinned by a flush.
    pub const UNASSIGNED: Revision = Revision(0);

    pub fn is_assigned(&self) -> bool {
        self.0 != 0
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    /// Flatten a clock reading into a revision.
    ///
    /// Sub-microsecond digits are discarded. A zero result can only come
    /// from a conversion fault and is rejected.
    pub fn from_timestamp(ts: DateTime<Utc>) -> Result<Revision, ClockError> {
        Self::from_clock_digits(&ts.format("%Y%m%d%H%M%S%6f").to_string())
    }

    /// Parse a `YYYYMMDDHHMMSSffffff` string, dropping its century digit.
    pub fn from_clock_digits(formatted: &str) -> Result<Revision, ClockError> {
        let invalid = || ClockError::InvalidTimestamp(formatted.to_string());

        let mut chars = formatted.chars();
        chars.next();
        let digits = chars.as_str();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let value: u64 = digits.parse().map_err(|_| invalid())?;
        if value == 0 {
            return Err(invalid());
        }
        Ok(Revision(value))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parse a timestamp as returned by the warehouse.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS[.fraction][ UTC]` and epoch
/// seconds with an optional fraction of up to nine digits.
pub fn parse_remote_timestamp(raw: &str) -> Result<DateTime<Utc>, ClockError> {
    let text = raw.trim();
    let invalid = || ClockError::InvalidTimestamp(raw.to_string());

    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts.with_timezone(&Utc));
    }

    let naive = text.strip_suffix(" UTC").unwrap_or(text);
    if let Ok(ts) = NaiveDateTime::parse_from_str(naive, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(ts.and_utc());
    }

    let (secs, fraction) = text.split_once('.').unwrap_or((text, ""));
    if secs.is_empty()
        || fraction.len() > 9
        || !secs.bytes().all(|b| b.is_ascii_digit())
        || !fraction.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(invalid());
    }
    let secs: i64 = secs.parse().map_err(|_| invalid())?;
    let nanos: u32 = if fraction.is_empty() {
        0
    } else {
        format!("{fraction:0<9}").parse().map_err(|_| invalid())?
    };

    DateTime::from_timestamp(secs, nanos).ok_or_else(invalid)
}
