//! Transport seam and structured error types.
//!
//! The `Transport` trait is the only thing in the pipeline that talks to the
//! network, so the planner, fetcher and orchestrator can be driven by a mock in
//! tests. A `Connector` opens one transport (one connection pool) per batch.

use thiserror::Error;

/// Structured error types for the fetch pipeline.
///
/// These are designed to be displayable in CLI contexts.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("data not found: {url}")]
    DataNotFound { url: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("fetch cancelled")]
    Cancelled,

    #[error("decode error: {0}")]
    Decode(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("parquet I/O error: {0}")]
    Parquet(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("fetch error: {0}")]
    Other(String),
}

impl FetchError {
    /// Only transport-level failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Network(_))
    }
}

/// Status and body of one HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// One open connection pool.
///
/// Implementations map transport failures (connect errors, timeouts, broken
/// bodies) to `FetchError::Network`; status codes are returned untouched.
pub trait Transport: Send + Sync {
    /// Header-only request. Returns the status code.
    fn head(&self, url: &str) -> Result<u16, FetchError>;

    /// Full GET. Returns status and body.
    fn get(&self, url: &str) -> Result<HttpResponse, FetchError>;
}

/// Opens transports. The pool lives exactly as long as the returned box.
pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn Transport>, FetchError>;
}

/// How one period of a request was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodOutcome {
    Cached,
    Fetched,
    Missing,
}

/// Progress callback for multi-archive requests.
///
/// Called from worker threads in concurrent mode, so implementations must be
/// `Sync`.
pub trait DownloadProgress: Send + Sync {
    /// Called when starting on an archive.
    fn on_start(&self, archive: &str, index: usize, total: usize);

    /// Called when an archive has been resolved.
    fn on_complete(&self, archive: &str, index: usize, total: usize, outcome: PeriodOutcome);

    /// Called when the whole request is done.
    fn on_batch_complete(&self, summary: &BatchSummary);
}

/// Tally of period outcomes for one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub cached: usize,
    pub fetched: usize,
    pub missing: usize,
}

impl BatchSummary {
    pub fn record(&mut self, outcome: PeriodOutcome) {
        match outcome {
            PeriodOutcome::Cached => self.cached += 1,
            PeriodOutcome::Fetched => self.fetched += 1,
            PeriodOutcome::Missing => self.missing += 1,
        }
    }
}

/// Silent progress.
pub struct NoProgress;

impl DownloadProgress for NoProgress {
    fn on_start(&self, _archive: &str, _index: usize, _total: usize) {}

    fn on_complete(&self, _archive: &str, _index: usize, _total: usize, _outcome: PeriodOutcome) {}

    fn on_batch_complete(&self, _summary: &BatchSummary) {}
}

/// Simple progress reporter that prints to stderr.
pub struct StderrProgress;

impl DownloadProgress for StderrProgress {
    fn on_start(&self, archive: &str, index: usize, total: usize) {
        eprintln!("[{}/{}] {archive}", index + 1, total);
    }

    fn on_complete(&self, archive: &str, _index: usize, _total: usize, outcome: PeriodOutcome) {
        match outcome {
            PeriodOutcome::Cached => eprintln!("  cached: {archive}"),
            PeriodOutcome::Fetched => eprintln!("  fetched: {archive}"),
            PeriodOutcome::Missing => eprintln!("  missing: {archive}"),
        }
    }

    fn on_batch_complete(&self, summary: &BatchSummary) {
        eprintln!(
            "\nDone: {} archives ({} fetched, {} cached, {} missing)",
            summary.total, summary.fetched, summary.cached, summary.missing
        );
    }
}
