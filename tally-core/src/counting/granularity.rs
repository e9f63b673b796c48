//! Time buckets and value kinds

use crate::{Result, TallyError, Timestamp};
use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Width of a time bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// A single bucket for all time, starting at the Unix epoch
    All,
    Minute,
    Hour,
    Day,
    Month,
    Year,
}

impl Granularity {
    /// Every granularity, in the order updates are emitted
    pub const ALL: [Granularity; 6] = [
        Granularity::All,
        Granularity::Minute,
        Granularity::Hour,
        Granularity::Day,
        Granularity::Month,
        Granularity::Year,
    ];

    /// Stable code stored in the `granularity` column
    pub fn code(&self) -> &'static str {
        match self {
            Granularity::All => "all",
            Granularity::Minute => "minutely",
            Granularity::Hour => "hourly",
            Granularity::Day => "daily",
            Granularity::Month => "monthly",
            Granularity::Year => "yearly",
        }
    }

    /// Start of the bucket containing `ts`. Idempotent.
    pub fn truncate(&self, ts: Timestamp) -> Timestamp {
        match self {
            Granularity::All => DateTime::<Utc>::UNIX_EPOCH,
            Granularity::Minute => at(ts.year(), ts.month(), ts.day(), ts.hour(), ts.minute()),
            Granularity::Hour => at(ts.year(), ts.month(), ts.day(), ts.hour(), 0),
            Granularity::Day => at(ts.year(), ts.month(), ts.day(), 0, 0),
            Granularity::Month => at(ts.year(), ts.month(), 1, 0, 0),
            Granularity::Year => at(ts.year(), 1, 1, 0, 0),
        }
    }
}

// Fields come from a valid UTC instant, so the result always exists
fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> Timestamp {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Granularity {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self> {
        Granularity::ALL
            .into_iter()
            .find(|g| g.code() == s)
            .ok_or_else(|| TallyError::InvalidArgument(format!("Unknown granularity: {}", s)))
    }
}

/// Statistic accumulated per bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// Number of events
    Counts,
    /// Sum of values
    Sums,
    /// Sum of squared values
    Squares,
}

impl ValueKind {
    /// Stable code stored in the `kind` column
    pub fn code(&self) -> &'static str {
        match self {
            ValueKind::Counts => "counts",
            ValueKind::Sums => "sums",
            ValueKind::Squares => "squares",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> Timestamp {
        s.parse().unwrap()
    }

    #[test]
    fn test_truncation() {
        let t = ts("2024-03-15T10:32:07.250Z");
        assert_eq!(Granularity::Minute.truncate(t), ts("2024-03-15T10:32:00Z"));
        assert_eq!(Granularity::Hour.truncate(t), ts("2024-03-15T10:00:00Z"));
        assert_eq!(Granularity::Day.truncate(t), ts("2024-03-15T00:00:00Z"));
        assert_eq!(Granularity::Month.truncate(t), ts("2024-03-01T00:00:00Z"));
        assert_eq!(Granularity::Year.truncate(t), ts("2024-01-01T00:00:00Z"));
        assert_eq!(Granularity::All.truncate(t), ts("1970-01-01T00:00:00Z"));
    }

    #[test]
    fn test_truncation_is_idempotent() {
        let samples = [
            "2024-02-29T23:59:59.999Z",
            "1969-12-31T23:59:59Z",
            "2000-01-01T00:00:00Z",
            "2031-07-04T12:00:30Z",
        ];
        for sample in samples {
            for g in Granularity::ALL {
                let once = g.truncate(ts(sample));
                assert_eq!(g.truncate(once), once, "{} {}", g, sample);
                assert!(once <= ts(sample) || g == Granularity::All);
            }
        }
    }

    #[test]
    fn test_same_bucket() {
        let a = ts("2024-03-15T10:32:01Z");
        let b = ts("2024-03-15T10:32:59Z");
        assert_eq!(Granularity::Minute.truncate(a), Granularity::Minute.truncate(b));
        assert_ne!(
            Granularity::Minute.truncate(a),
            Granularity::Minute.truncate(ts("2024-03-15T10:33:00Z"))
        );
    }

    #[test]
    fn test_codes() {
        let codes: Vec<_> = Granularity::ALL.iter().map(|g| g.code()).collect();
        assert_eq!(codes, ["all", "minutely", "hourly", "daily", "monthly", "yearly"]);
        assert_eq!("hourly".parse::<Granularity>().unwrap(), Granularity::Hour);
        assert!("weekly".parse::<Granularity>().is_err());
        assert_eq!(ValueKind::Squares.to_string(), "squares");
    }
}
