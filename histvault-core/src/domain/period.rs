//! Archive periods: one calendar month or one calendar day.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use super::kind::Granularity;

/// One concrete month or day used as an archive coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    Month { year: i32, month: u32 },
    Day(NaiveDate),
}

impl Period {
    /// The month containing `dt`.
    pub fn month_of(dt: NaiveDateTime) -> Self {
        Period::Month {
            year: dt.year(),
            month: dt.month(),
        }
    }

    pub fn granularity(&self) -> Granularity {
        match self {
            Period::Month { .. } => Granularity::Monthly,
            Period::Day(_) => Granularity::Daily,
        }
    }

    /// First calendar day covered by this period.
    pub fn first_day(&self) -> NaiveDate {
        match *self {
            // Month periods are only built from valid dates.
            Period::Month { year, month } => {
                NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
            }
            Period::Day(date) => date,
        }
    }

    /// First instant covered by this period.
    pub fn start(&self) -> NaiveDateTime {
        self.first_day().and_time(NaiveTime::MIN)
    }

    /// First instant after this period. Saturates at the last representable instant.
    pub fn end(&self) -> NaiveDateTime {
        self.next()
            .map(|p| p.start())
            .unwrap_or(NaiveDateTime::MAX)
    }

    /// The following period of the same granularity, or `None` past the
    /// last representable date.
    pub fn next(&self) -> Option<Self> {
        match *self {
            Period::Month { year, month } if month == 12 => {
                NaiveDate::from_ymd_opt(year + 1, 1, 1)?;
                Some(Period::Month {
                    year: year + 1,
                    month: 1,
                })
            }
            Period::Month { year, month } => Some(Period::Month {
                year,
                month: month + 1,
            }),
            Period::Day(date) => date.succ_opt().map(Period::Day),
        }
    }

    /// Archive file-name label: `YYYY-MM` or `YYYY-MM-DD`.
    pub fn label(&self) -> String {
        match self {
            Period::Month { year, month } => format!("{year:04}-{month:02}"),
            Period::Day(date) => date.format("%Y-%m-%d").to_string(),
        }
    }
}

impl Ord for Period {
    fn cmp(&self, other: &Self) -> Ordering {
        self.start()
            .cmp(&other.start())
            .then(self.granularity().cmp(&other.granularity()))
    }
}

impl PartialOrd for Period {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Every month whose first instant lies in `[month_start(start), end]`.
///
/// Never empty when `start <= end`.
pub fn months_between(start: NaiveDateTime, end: NaiveDateTime) -> Vec<Period> {
    let mut months = Vec::new();
    let mut current = Period::month_of(start);
    while current.start() <= end {
        months.push(current);
        match current.next() {
            Some(next) => current = next,
            None => break,
        }
    }
    months
}

/// Every calendar day `d` with `from <= d < end`, stepping from `from`'s date.
pub fn days_between(from: NaiveDate, end: NaiveDateTime) -> Vec<Period> {
    let mut days = Vec::new();
    let mut current = Period::Day(from);
    while current.start() < end {
        days.push(current);
        match current.next() {
            Some(next) => current = next,
            None => break,
        }
    }
    days
}
