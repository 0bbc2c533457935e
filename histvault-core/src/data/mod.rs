//! Archive resolution, fetching, caching and decoding

pub mod cache;
pub mod cancel;
pub mod decode;
pub mod download;
pub mod fetcher;
pub mod http;
pub mod planner;
pub mod probe;
pub mod provider;
pub mod rate_limiter;
pub mod request;
pub mod schema;
pub mod symbols;
pub mod url;

pub use cache::{CacheStatus, ParquetCache};
pub use cancel::{CancelToken, Pause, ThreadPause};
pub use decode::decode;
pub use download::HistoryClient;
pub use fetcher::{fetch_once, ConcurrentFetcher, RetryPolicy};
pub use http::HttpConnector;
pub use planner::{plan, HistoryGap, Plan};
pub use probe::{CacheAwareProber, ExistenceCheck, RemoteProber};
pub use provider::{
    BatchSummary, Connector, DownloadProgress, FetchError, HttpResponse, NoProgress,
    PeriodOutcome, StderrProgress, Transport,
};
pub use rate_limiter::RateLimiter;
pub use request::{parse_datetime, FetchRequest};
pub use schema::{TableSchema, DATETIME_COLUMN};
pub use symbols::{SymbolProvider, TardisProvider};
pub use url::{resolve, ArchiveSpec, DEFAULT_BASE_URL};
