//! histvault core: historical market-data archives as time-indexed tables.
//!
//! The archive server publishes one ZIP/CSV bundle per symbol, kind and
//! period, monthly for settled history and daily for the recent tail. This
//! crate contains:
//! - Archive coordinates (kinds, segments, intervals, periods)
//! - URL resolution and existence probing
//! - The monthly/daily date-range planner
//! - Sequential and concurrent fetching with rate limiting and retry
//! - A Parquet cache keyed by archive URL
//! - Decoding into polars DataFrames with a timezone-aware `datetime` column

pub mod config;
pub mod data;
pub mod domain;

pub use config::VaultConfig;
pub use data::{FetchError, FetchRequest, HistoryClient};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything shared with worker threads is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        // Domain types
        require_send::<domain::DataKind>();
        require_sync::<domain::DataKind>();
        require_send::<domain::Period>();
        require_sync::<domain::Period>();
        require_send::<domain::Symbol>();
        require_sync::<domain::Symbol>();

        // Pipeline types
        require_send::<FetchRequest>();
        require_sync::<FetchRequest>();
        require_send::<FetchError>();
        require_sync::<FetchError>();
        require_send::<data::ParquetCache>();
        require_sync::<data::ParquetCache>();
        require_send::<data::RateLimiter>();
        require_sync::<data::RateLimiter>();
        require_send::<data::CancelToken>();
        require_sync::<data::CancelToken>();
        require_send::<data::ArchiveSpec>();
        require_sync::<data::ArchiveSpec>();

        // Client
        require_send::<HistoryClient>();
        require_sync::<HistoryClient>();
        require_send::<data::HttpConnector>();
        require_sync::<data::HttpConnector>();
    }

    /// Architecture contract: the planner only sees the network through
    /// `ExistenceCheck`, so it can be driven without a server.
    #[test]
    fn planner_takes_an_existence_check() {
        fn _check(
            check: &dyn data::ExistenceCheck,
            spec: &data::ArchiveSpec,
            start: chrono::NaiveDateTime,
            end: chrono::NaiveDateTime,
        ) -> Result<data::Plan, FetchError> {
            data::plan(check, data::DEFAULT_BASE_URL, spec, start, end)
        }
    }
}
