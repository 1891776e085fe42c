use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid timestamp '{0}'")]
pub struct TimestampError(pub String);

/// Instant with microsecond resolution, counted from 1970-01-01 00:00:00.
///
/// Timestamps carry no zone; they are read and written as UTC wall-clock
/// values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    micros: i64,
}

impl Timestamp {
    pub fn from_micros(micros: i64) -> Self {
        Self { micros }
    }

    pub fn micros(&self) -> i64 {
        self.micros
    }

    /// Parses `YYYY-MM-DD[( |T)HH:MM:SS[.fffffffff]]`.
    ///
    /// A missing time or fraction reads as zero. Digits below one
    /// microsecond are truncated.
    pub fn parse(text: &str) -> Result<Self, TimestampError> {
        let invalid = || TimestampError(text.to_string());
        let trimmed = text.trim();

        let (date, time) = match trimmed.split_once([' ', 'T']) {
            Some((date, time)) => (date, Some(time.trim())),
            None => (trimmed, None),
        };

        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| invalid())?;
        let time = match time {
            Some(time) => NaiveTime::parse_from_str(time, "%H:%M:%S%.f").map_err(|_| invalid())?,
            None => NaiveTime::MIN,
        };

        Ok(Self::from_naive(date.and_time(time)))
    }

    pub fn from_naive(value: NaiveDateTime) -> Self {
        Self {
            micros: value.and_utc().timestamp_micros(),
        }
    }

    /// `None` when the instant falls outside chrono's supported range.
    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        DateTime::from_timestamp_micros(self.micros).map(|dt| dt.naive_utc())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_naive() {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.6f")),
            None => write!(f, "{}us", self.micros),
        }
    }
}
