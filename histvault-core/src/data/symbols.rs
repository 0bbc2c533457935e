//! Symbol discovery through exchange metadata.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use serde::Deserialize;

use super::provider::FetchError;
use crate::domain::{Segment, Symbol, SymbolType};

/// Public Tardis API host.
pub const TARDIS_BASE_URL: &str = "https://api.tardis.dev";

/// Aggregate pseudo-symbols listed next to the real ones.
const AGGREGATE_IDS: [&str; 3] = ["SPOT", "PERPETUALS", "FUTURES"];

/// Lists the tradable symbols of a segment, keyed by id.
pub trait SymbolProvider: Send + Sync {
    fn symbols(&self, segment: Segment) -> Result<BTreeMap<String, Symbol>, FetchError>;
}

/// Tardis exchange name for each segment.
pub fn exchange_for(segment: Segment) -> &'static str {
    match segment {
        Segment::Spot => "binance",
        Segment::LinearDerivatives => "binance-futures",
        Segment::InverseDerivatives => "binance-delivery",
    }
}

#[derive(Debug, Deserialize)]
struct ExchangeDetails {
    datasets: Datasets,
}

#[derive(Debug, Deserialize)]
struct Datasets {
    symbols: Vec<SymbolEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolEntry {
    id: String,
    #[serde(rename = "type")]
    symbol_type: String,
    available_since: DateTime<Utc>,
    #[serde(default)]
    available_to: Option<DateTime<Utc>>,
}

/// Parse a `/v1/exchanges/{exchange}` response body.
pub fn parse_exchange_details(body: &str) -> Result<BTreeMap<String, Symbol>, FetchError> {
    let details: ExchangeDetails = serde_json::from_str(body)
        .map_err(|e| FetchError::Decode(format!("exchange details: {e}")))?;

    let mut symbols = BTreeMap::new();
    for entry in details.datasets.symbols {
        if AGGREGATE_IDS.contains(&entry.id.as_str()) {
            continue;
        }
        let symbol_type = match entry.symbol_type.parse::<SymbolType>() {
            Ok(t) => t,
            Err(e) => {
                debug!("skipping {}: {e}", entry.id);
                continue;
            }
        };
        symbols.insert(
            entry.id.clone(),
            Symbol {
                id: entry.id,
                symbol_type,
                available_since: entry.available_since,
                available_to: entry.available_to,
            },
        );
    }
    Ok(symbols)
}

/// Blocking client for the Tardis exchange-details endpoint.
pub struct TardisProvider {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl TardisProvider {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, FetchError> {
        Self::with_base_url(TARDIS_BASE_URL, timeout, user_agent)
    }

    pub fn with_base_url(
        base_url: &str,
        timeout: Duration,
        user_agent: &str,
    ) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| FetchError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl SymbolProvider for TardisProvider {
    fn symbols(&self, segment: Segment) -> Result<BTreeMap<String, Symbol>, FetchError> {
        let url = format!("{}/v1/exchanges/{}", self.base_url, exchange_for(segment));
        let resp = self
            .client
            .get(&url)
            .send()
            .map_err(|e| FetchError::Network(format!("{url}: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Network(format!("HTTP {status} for {url}")));
        }
        let body = resp
            .text()
            .map_err(|e| FetchError::Network(format!("{url}: {e}")))?;
        parse_exchange_details(&body)
    }
}
