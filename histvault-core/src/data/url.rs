//! Archive URL resolution.
//!
//! Layout (the server leaves the kind token out of candle file names):
//!
//! ```text
//! {base}/data/{segment}/{granularity}/klines/{symbol}/{interval}/{symbol}-{interval}-{period}.zip
//! {base}/data/{segment}/{granularity}/{kind}/{symbol}/{symbol}-{kind}-{period}.zip
//! ```

use super::provider::FetchError;
use crate::domain::{DataKind, Granularity, Interval, Period, Segment};

/// Public archive host.
pub const DEFAULT_BASE_URL: &str = "https://data.binance.vision";

/// Check that `kind` is published for `segment` and that candles carry an interval.
pub fn validate_combination(
    kind: DataKind,
    segment: Segment,
    interval: Option<Interval>,
) -> Result<(), FetchError> {
    if !kind.supports(segment) {
        return Err(FetchError::InvalidRequest(format!(
            "data kind '{kind}' is not published for segment '{segment}'"
        )));
    }
    if kind.requires_interval() && interval.is_none() {
        return Err(FetchError::InvalidRequest(format!(
            "data kind '{kind}' requires a bar interval"
        )));
    }
    Ok(())
}

/// Build the archive URL for one period.
pub fn resolve(
    base_url: &str,
    kind: DataKind,
    segment: Segment,
    granularity: Granularity,
    symbol: &str,
    period: Period,
    interval: Option<Interval>,
) -> Result<String, FetchError> {
    validate_combination(kind, segment, interval)?;
    if period.granularity() != granularity {
        return Err(FetchError::InvalidRequest(format!(
            "period {period} is not a {granularity} period"
        )));
    }

    let base = base_url.trim_end_matches('/');
    let prefix = format!("{base}/data/{segment}/{granularity}/{kind}/{symbol}");
    let label = period.label();
    let url = match (kind, interval) {
        (DataKind::Klines, Some(interval)) => {
            format!("{prefix}/{interval}/{symbol}-{interval}-{label}.zip")
        }
        _ => format!("{prefix}/{symbol}-{kind}-{label}.zip"),
    };
    Ok(url)
}

/// The identity of an archive series: everything but the period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSpec {
    pub kind: DataKind,
    pub segment: Segment,
    pub symbol: String,
    pub interval: Option<Interval>,
}

impl ArchiveSpec {
    /// Validates the combination up front so later `url` calls only fail on
    /// granularity mismatches, which cannot happen for planner output.
    pub fn new(
        kind: DataKind,
        segment: Segment,
        symbol: impl Into<String>,
        interval: Option<Interval>,
    ) -> Result<Self, FetchError> {
        validate_combination(kind, segment, interval)?;
        Ok(Self {
            kind,
            segment,
            symbol: symbol.into(),
            // Intervals only belong in candle paths.
            interval: if kind.requires_interval() { interval } else { None },
        })
    }

    pub fn url(&self, base_url: &str, period: Period) -> Result<String, FetchError> {
        resolve(
            base_url,
            self.kind,
            self.segment,
            period.granularity(),
            &self.symbol,
            period,
            self.interval,
        )
    }
}
