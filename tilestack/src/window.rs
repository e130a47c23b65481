//! Time windowing.
//!
//! Partitions a global date range into possibly overlapping windows of a
//! fixed [`Period`] duration, each starting one step after the previous.
//!
//! Window `k` always starts at `start_date + k * step`, computed from the
//! global start rather than from the previous window, so month and year
//! steps never drift across short months.
//!
//! The final window keeps its nominal end even when it extends past
//! `end_date`. Observations are clipped to `[start_date, end_date)` by the
//! stack builder, not by shortening windows.

use chrono::{DateTime, Duration, Months, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors from parsing or applying time configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WindowError {
    /// Period string is not `<n><d|w|m|y>`
    #[error("Invalid period '{0}' (expected e.g. '16d', '2w', '3m' or '1y')")]
    InvalidPeriod(String),

    /// Period length is zero
    #[error("Period '{0}' must be greater than zero")]
    ZeroPeriod(String),

    /// Date string could not be parsed
    #[error("Invalid date '{0}' (expected YYYY-MM-DD or RFC 3339)")]
    InvalidDate(String),

    /// Start date is not before end date
    #[error("Start date {start} must be before end date {end}")]
    EmptyRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// Calendar-aware length of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    Days(u32),
    Weeks(u32),
    Months(u32),
    Years(u32),
}

impl Period {
    /// Adds `count` multiples of this period to `instant`.
    ///
    /// Returns `None` if the result is not representable.
    pub fn add_to(&self, instant: DateTime<Utc>, count: u32) -> Option<DateTime<Utc>> {
        match *self {
            Period::Days(n) => {
                instant.checked_add_signed(Duration::days(i64::from(n) * i64::from(count)))
            }
            Period::Weeks(n) => {
                instant.checked_add_signed(Duration::weeks(i64::from(n) * i64::from(count)))
            }
            Period::Months(n) => {
                instant.checked_add_months(Months::new(n.checked_mul(count)?))
            }
            Period::Years(n) => {
                instant.checked_add_months(Months::new(n.checked_mul(12)?.checked_mul(count)?))
            }
        }
    }

    fn amount(&self) -> u32 {
        match *self {
            Period::Days(n) | Period::Weeks(n) | Period::Months(n) | Period::Years(n) => n,
        }
    }
}

impl FromStr for Period {
    type Err = WindowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || WindowError::InvalidPeriod(s.to_string());

        let unit = s.chars().last().ok_or_else(invalid)?;
        let amount: u32 = s[..s.len() - unit.len_utf8()]
            .trim()
            .parse()
            .map_err(|_| invalid())?;

        let period = match unit.to_ascii_lowercase() {
            'd' => Period::Days(amount),
            'w' => Period::Weeks(amount),
            'm' => Period::Months(amount),
            'y' => Period::Years(amount),
            _ => return Err(invalid()),
        };

        if period.amount() == 0 {
            return Err(WindowError::ZeroPeriod(s.to_string()));
        }
        Ok(period)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Days(n) => write!(f, "{}d", n),
            Period::Weeks(n) => write!(f, "{}w", n),
            Period::Months(n) => write!(f, "{}m", n),
            Period::Years(n) => write!(f, "{}y", n),
        }
    }
}

/// Half-open time range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    #[inline]
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    /// Intersection with another range, or `None` if they do not overlap.
    pub fn intersect(&self, other: &TimeWindow) -> Option<TimeWindow> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(TimeWindow { start, end })
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}

/// Immutable description of the temporal tiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub duration: Period,
    pub step: Period,
}

impl WindowSpec {
    pub fn new(
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        duration: Period,
        step: Period,
    ) -> Result<Self, WindowError> {
        if start_date >= end_date {
            return Err(WindowError::EmptyRange {
                start: start_date,
                end: end_date,
            });
        }
        Ok(Self {
            start_date,
            end_date,
            duration,
            step,
        })
    }

    /// The global range `[start_date, end_date)`.
    pub fn range(&self) -> TimeWindow {
        TimeWindow::new(self.start_date, self.end_date)
    }

    /// Lazily enumerates the windows of this spec.
    pub fn windows(&self) -> Windows {
        windows(self.start_date, self.end_date, self.duration, self.step)
    }
}

/// Lazily enumerates windows over `[start_date, end_date)`.
///
/// The iterator is finite and ordered by start; clone it to restart.
pub fn windows(
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    duration: Period,
    step: Period,
) -> Windows {
    Windows {
        start_date,
        end_date,
        duration,
        step,
        index: 0,
    }
}

/// Iterator over time windows. See [`windows`].
#[derive(Debug, Clone)]
pub struct Windows {
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    duration: Period,
    step: Period,
    index: u32,
}

impl Iterator for Windows {
    type Item = TimeWindow;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.step.add_to(self.start_date, self.index)?;
        if start >= self.end_date {
            return None;
        }
        let end = self.duration.add_to(start, 1)?;
        self.index = self.index.checked_add(1)?;
        Some(TimeWindow { start, end })
    }
}

/// Parses `YYYY-MM-DD` (midnight UTC) or an RFC 3339 timestamp.
pub fn parse_date(s: &str) -> Result<DateTime<Utc>, WindowError> {
    let s = s.trim();
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&midnight));
        }
    }
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| WindowError::InvalidDate(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> DateTime<Utc> {
        parse_date(s).unwrap()
    }

    #[test]
    fn test_parse_period_units() {
        assert_eq!("16d".parse::<Period>().unwrap(), Period::Days(16));
        assert_eq!("2w".parse::<Period>().unwrap(), Period::Weeks(2));
        assert_eq!("3m".parse::<Period>().unwrap(), Period::Months(3));
        assert_eq!(" 1Y ".parse::<Period>().unwrap(), Period::Years(1));
    }

    #[test]
    fn test_parse_period_rejects_garbage() {
        assert!(matches!(
            "3q".parse::<Period>(),
            Err(WindowError::InvalidPeriod(_))
        ));
        assert!(matches!(
            "m".parse::<Period>(),
            Err(WindowError::InvalidPeriod(_))
        ));
        assert!(matches!(
            "0d".parse::<Period>(),
            Err(WindowError::ZeroPeriod(_))
        ));
    }

    #[test]
    fn test_quarterly_windows_over_one_year() {
        let all: Vec<_> = windows(
            date("2015-01-01"),
            date("2016-01-01"),
            Period::Months(3),
            Period::Months(3),
        )
        .collect();

        assert_eq!(all.len(), 4);
        assert_eq!(all[0], TimeWindow::new(date("2015-01-01"), date("2015-04-01")));
        assert_eq!(all[3], TimeWindow::new(date("2015-10-01"), date("2016-01-01")));
    }

    #[test]
    fn test_overlapping_windows() {
        let all: Vec<_> = windows(
            date("2015-01-01"),
            date("2015-04-01"),
            Period::Months(2),
            Period::Months(1),
        )
        .collect();

        assert_eq!(all.len(), 3);
        assert_eq!(all[1].start, date("2015-02-01"));
        assert_eq!(all[1].end, date("2015-04-01"));
        assert!(all[0].end > all[1].start);
    }

    #[test]
    fn test_final_window_keeps_nominal_end() {
        let all: Vec<_> = windows(
            date("2015-01-01"),
            date("2015-05-15"),
            Period::Months(3),
            Period::Months(3),
        )
        .collect();

        assert_eq!(all.len(), 2);
        assert_eq!(all[1].start, date("2015-04-01"));
        assert_eq!(all[1].end, date("2015-07-01"));
    }

    #[test]
    fn test_month_steps_do_not_drift() {
        let all: Vec<_> = windows(
            date("2015-01-31"),
            date("2015-05-01"),
            Period::Months(1),
            Period::Months(1),
        )
        .collect();

        // Clamped to month end, but each start is computed from the global start
        assert_eq!(all[1].start, date("2015-02-28"));
        assert_eq!(all[2].start, date("2015-03-31"));
    }

    #[test]
    fn test_windows_are_restartable() {
        let iter = windows(
            date("2015-01-01"),
            date("2015-03-01"),
            Period::Days(10),
            Period::Days(10),
        );
        let first: Vec<_> = iter.clone().collect();
        let second: Vec<_> = iter.collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 6);
    }

    #[test]
    fn test_window_contains_is_half_open() {
        let window = TimeWindow::new(date("2015-01-01"), date("2015-04-01"));
        assert!(window.contains(date("2015-01-01")));
        assert!(window.contains(date("2015-03-31T23:59:59Z")));
        assert!(!window.contains(date("2015-04-01")));
    }

    #[test]
    fn test_window_intersection() {
        let window = TimeWindow::new(date("2015-10-01"), date("2016-01-01"));
        let range = TimeWindow::new(date("2015-01-01"), date("2015-11-15"));

        let clipped = window.intersect(&range).unwrap();
        assert_eq!(clipped.start, date("2015-10-01"));
        assert_eq!(clipped.end, date("2015-11-15"));

        let disjoint = TimeWindow::new(date("2016-01-01"), date("2016-02-01"));
        assert!(window.intersect(&disjoint).is_none());
    }

    #[test]
    fn test_window_spec_rejects_empty_range() {
        let result = WindowSpec::new(
            date("2016-01-01"),
            date("2015-01-01"),
            Period::Years(1),
            Period::Years(1),
        );
        assert!(matches!(result, Err(WindowError::EmptyRange { .. })));
    }

    #[test]
    fn test_parse_date_formats() {
        assert_eq!(
            parse_date("2015-04-01").unwrap(),
            parse_date("2015-04-01T00:00:00Z").unwrap()
        );
        assert!(parse_date("01/04/2015").is_err());
    }
}
