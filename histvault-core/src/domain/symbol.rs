//! Tradable symbols and their listing windows.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::kind::ParseError;

/// Contract classification reported by the exchange-metadata provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolType {
    Spot,
    Perpetual,
    Future,
}

impl FromStr for SymbolType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spot" => Ok(SymbolType::Spot),
            "perpetual" => Ok(SymbolType::Perpetual),
            "future" => Ok(SymbolType::Future),
            other => Err(ParseError::SymbolType(other.to_string())),
        }
    }
}

/// A tradable symbol and the interval during which data exists for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub id: String,
    pub symbol_type: SymbolType,
    pub available_since: DateTime<Utc>,
    /// `None` while the symbol is still listed.
    pub available_to: Option<DateTime<Utc>>,
}

impl Symbol {
    /// Intersect a naive-UTC window with `[available_since, available_to)`.
    ///
    /// Returns `None` when the window lies entirely outside availability.
    pub fn clamp_window(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Option<(NaiveDateTime, NaiveDateTime)> {
        let since = self.available_since.naive_utc();
        let start = start.max(since);
        let end = match self.available_to {
            Some(to) => end.min(to.naive_utc()),
            None => end,
        };
        (start < end).then_some((start, end))
    }
}

/// Canonical archive spelling of a symbol: upper case, no separators.
///
/// `btc/usdt` → `BTCUSDT`.
pub fn normalize_symbol(raw: &str) -> String {
    raw.trim().to_ascii_uppercase().replace('/', "")
}
