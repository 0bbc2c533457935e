//! Request description and timezone handling at the API boundary.

use chrono::{NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::provider::FetchError;
use super::url::validate_combination;
use crate::domain::{normalize_symbol, DataKind, Interval, Segment};

/// Default requests per second in concurrent mode.
pub const DEFAULT_RATE_LIMIT: f64 = 3.0;

/// One history request. `start`/`end` are wall-clock times in `timezone`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub symbol: String,
    pub segment: Segment,
    pub kind: DataKind,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub timezone: String,
    pub interval: Option<Interval>,
    pub concurrent: bool,
    pub cache_write: bool,
    /// Requests per second in concurrent mode; `None` is unlimited.
    pub rate_limit: Option<f64>,
}

impl FetchRequest {
    pub fn new(
        symbol: impl Into<String>,
        segment: Segment,
        kind: DataKind,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            segment,
            kind,
            start,
            end,
            timezone: "UTC".to_string(),
            interval: None,
            concurrent: false,
            cache_write: false,
            rate_limit: Some(DEFAULT_RATE_LIMIT),
        }
    }

    pub fn with_timezone(mut self, tz: impl Into<String>) -> Self {
        self.timezone = tz.into();
        self
    }

    pub fn with_interval(mut self, interval: Interval) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    pub fn cache_write(mut self, enabled: bool) -> Self {
        self.cache_write = enabled;
        self
    }

    pub fn rate_limit(mut self, requests_per_second: Option<f64>) -> Self {
        self.rate_limit = requests_per_second;
        self
    }

    /// Upper-case symbol with any `/` removed.
    pub fn normalized_symbol(&self) -> String {
        normalize_symbol(&self.symbol)
    }

    pub fn tz(&self) -> Result<Tz, FetchError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| FetchError::InvalidRequest(format!("unknown timezone '{}'", self.timezone)))
    }

    /// Check everything that can be checked without the network.
    pub fn validate(&self) -> Result<(), FetchError> {
        if self.normalized_symbol().is_empty() {
            return Err(FetchError::InvalidRequest("symbol is empty".into()));
        }
        if self.start > self.end {
            return Err(FetchError::InvalidRequest(format!(
                "start {} is after end {}",
                self.start, self.end
            )));
        }
        if let Some(rate) = self.rate_limit {
            if !rate.is_finite() || rate < 0.0 {
                return Err(FetchError::InvalidRequest(format!(
                    "rate limit must be a non-negative number, got {rate}"
                )));
            }
        }
        self.tz()?;
        validate_combination(self.kind, self.segment, self.interval)
    }

    /// `[start, end)` converted to naive UTC.
    pub fn utc_window(&self) -> Result<(NaiveDateTime, NaiveDateTime), FetchError> {
        let tz = self.tz()?;
        Ok((to_utc(&tz, self.start)?, to_utc(&tz, self.end)?))
    }
}

/// Interpret `local` as wall-clock time in `tz`. Ambiguous times resolve to
/// the earlier instant.
pub fn to_utc(tz: &Tz, local: NaiveDateTime) -> Result<NaiveDateTime, FetchError> {
    tz.from_local_datetime(&local)
        .earliest()
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| {
            FetchError::InvalidRequest(format!("{local} does not exist in timezone {tz}"))
        })
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Parse a free-form window bound. A trailing UTC offset or `Z` is ignored;
/// the wall-clock value is what counts.
pub fn parse_datetime(raw: &str) -> Result<NaiveDateTime, FetchError> {
    let s = strip_offset(raw.trim());
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(|d| d.and_time(chrono::NaiveTime::MIN))
        .map_err(|_| FetchError::InvalidRequest(format!("cannot parse datetime '{raw}'")))
}

fn strip_offset(s: &str) -> &str {
    if let Some(rest) = s.strip_suffix('Z') {
        return rest;
    }
    // `+08:00` / `-0500` after a time component.
    if let Some(time_part) = s.get(10..).filter(|t| !t.is_empty()) {
        if let Some(pos) = time_part.rfind(['+', '-']) {
            let pos = pos + 10;
            let tail = &s[pos + 1..];
            if !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit() || c == ':') {
                return &s[..pos];
            }
        }
    }
    s
}
