//! Closed vocabularies for archive coordinates: data kind, market segment,
//! bundle granularity and candle interval.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::data::schema::{self, TableSchema};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unknown data kind '{0}'")]
    Kind(String),

    #[error("unknown market segment '{0}' (expected spot, futures/um or futures/cm)")]
    Segment(String),

    #[error("unknown bar interval '{0}'")]
    Interval(String),

    #[error("unknown symbol type '{0}'")]
    SymbolType(String),
}

/// The category of market data an archive holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DataKind {
    /// Candles (`klines`). Requires a bar interval.
    Klines,
    AggTrades,
    /// Best bid/ask snapshots. Only published for inverse derivatives.
    BookTicker,
    /// Only published for derivatives, and only as monthly bundles.
    FundingRate,
    Trades,
    /// Open interest and long/short ratios. Derivatives only.
    Metrics,
}

impl DataKind {
    pub const ALL: [DataKind; 6] = [
        DataKind::Klines,
        DataKind::AggTrades,
        DataKind::BookTicker,
        DataKind::FundingRate,
        DataKind::Trades,
        DataKind::Metrics,
    ];

    /// Path token used by the archive server.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::Klines => "klines",
            DataKind::AggTrades => "aggTrades",
            DataKind::BookTicker => "bookTicker",
            DataKind::FundingRate => "fundingRate",
            DataKind::Trades => "trades",
            DataKind::Metrics => "metrics",
        }
    }

    /// Fixed column layout of this kind's CSV payload.
    pub fn schema(&self) -> &'static TableSchema {
        match self {
            DataKind::Klines => &schema::KLINES,
            DataKind::AggTrades => &schema::AGG_TRADES,
            DataKind::BookTicker => &schema::BOOK_TICKER,
            DataKind::FundingRate => &schema::FUNDING_RATE,
            DataKind::Trades => &schema::TRADES,
            DataKind::Metrics => &schema::METRICS,
        }
    }

    pub fn requires_interval(&self) -> bool {
        matches!(self, DataKind::Klines)
    }

    /// Whether the server publishes daily bundles for this kind.
    pub fn has_daily_archives(&self) -> bool {
        !matches!(self, DataKind::FundingRate)
    }

    /// Whether `segment` carries this kind at all.
    pub fn supports(&self, segment: Segment) -> bool {
        match self {
            DataKind::FundingRate | DataKind::Metrics => segment != Segment::Spot,
            DataKind::BookTicker => segment == Segment::InverseDerivatives,
            DataKind::Klines | DataKind::AggTrades | DataKind::Trades => true,
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['_', '-'], "").as_str() {
            "klines" | "candles" => Ok(DataKind::Klines),
            "aggtrades" => Ok(DataKind::AggTrades),
            "bookticker" => Ok(DataKind::BookTicker),
            "fundingrate" => Ok(DataKind::FundingRate),
            "trades" => Ok(DataKind::Trades),
            "metrics" => Ok(DataKind::Metrics),
            _ => Err(ParseError::Kind(s.to_string())),
        }
    }
}

/// Market category an archive belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    Spot,
    /// USDⓈ-margined futures and perpetuals (`futures/um`).
    LinearDerivatives,
    /// Coin-margined futures and perpetuals (`futures/cm`).
    InverseDerivatives,
}

impl Segment {
    pub fn as_path(&self) -> &'static str {
        match self {
            Segment::Spot => "spot",
            Segment::LinearDerivatives => "futures/um",
            Segment::InverseDerivatives => "futures/cm",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_path())
    }
}

impl FromStr for Segment {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spot" => Ok(Segment::Spot),
            "futures/um" | "um" | "linear" => Ok(Segment::LinearDerivatives),
            "futures/cm" | "cm" | "inverse" => Ok(Segment::InverseDerivatives),
            _ => Err(ParseError::Segment(s.to_string())),
        }
    }
}

/// Time coverage of one archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Monthly,
    Daily,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Monthly => "monthly",
            Granularity::Daily => "daily",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Candle bar interval as published by the archive server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1s")]
    S1,
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "3m")]
    M3,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "2h")]
    H2,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "6h")]
    H6,
    #[serde(rename = "8h")]
    H8,
    #[serde(rename = "12h")]
    H12,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "3d")]
    D3,
    #[serde(rename = "1w")]
    W1,
    #[serde(rename = "1mo")]
    Mo1,
}

impl Interval {
    pub const ALL: [Interval; 16] = [
        Interval::S1,
        Interval::M1,
        Interval::M3,
        Interval::M5,
        Interval::M15,
        Interval::M30,
        Interval::H1,
        Interval::H2,
        Interval::H4,
        Interval::H6,
        Interval::H8,
        Interval::H12,
        Interval::D1,
        Interval::D3,
        Interval::W1,
        Interval::Mo1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::S1 => "1s",
            Interval::M1 => "1m",
            Interval::M3 => "3m",
            Interval::M5 => "5m",
            Interval::M15 => "15m",
            Interval::M30 => "30m",
            Interval::H1 => "1h",
            Interval::H2 => "2h",
            Interval::H4 => "4h",
            Interval::H6 => "6h",
            Interval::H8 => "8h",
            Interval::H12 => "12h",
            Interval::D1 => "1d",
            Interval::D3 => "3d",
            Interval::W1 => "1w",
            Interval::Mo1 => "1mo",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Interval::ALL
            .into_iter()
            .find(|i| i.as_str() == s)
            .ok_or_else(|| ParseError::Interval(s.to_string()))
    }
}
