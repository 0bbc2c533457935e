//! Fetch orchestrator: plan, fetch or load every period, concatenate, clip.

use std::sync::Arc;

use chrono::NaiveDateTime;
use log::{debug, warn};
use polars::prelude::*;
use rayon::prelude::*;

use super::cache::ParquetCache;
use super::cancel::{CancelToken, Pause, ThreadPause};
use super::decode::decode;
use super::fetcher::{fetch_once, ConcurrentFetcher};
use super::http::HttpConnector;
use super::planner::{self, Plan};
use super::probe::{CacheAwareProber, RemoteProber};
use super::provider::{
    BatchSummary, Connector, DownloadProgress, FetchError, NoProgress, PeriodOutcome, Transport,
};
use super::rate_limiter::RateLimiter;
use super::request::FetchRequest;
use super::schema::DATETIME_COLUMN;
use super::url::ArchiveSpec;
use crate::config::VaultConfig;
use crate::domain::{DataKind, Interval, Period, Segment};

/// Entry point for history requests.
///
/// Holds no per-request state; the only thing shared between requests is the
/// cache directory.
pub struct HistoryClient {
    config: VaultConfig,
    cache: ParquetCache,
    connector: Arc<dyn Connector>,
    progress: Arc<dyn DownloadProgress>,
    pause: Arc<dyn Pause>,
}

impl HistoryClient {
    /// Client talking HTTP to `config.base_url`.
    pub fn new(config: VaultConfig) -> Result<Self, FetchError> {
        config.validate()?;
        let connector = HttpConnector::new(config.timeout(), config.user_agent.clone());
        Ok(Self::with_connector(config, Arc::new(connector)))
    }

    /// Client using a caller-supplied transport.
    pub fn with_connector(config: VaultConfig, connector: Arc<dyn Connector>) -> Self {
        let cache = ParquetCache::new(config.cache_dir.clone());
        Self {
            config,
            cache,
            connector,
            progress: Arc::new(NoProgress),
            pause: Arc::new(ThreadPause),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn DownloadProgress>) -> Self {
        self.progress = progress;
        self
    }

    /// Replace how retry backoff waits.
    pub fn with_pause(mut self, pause: Arc<dyn Pause>) -> Self {
        self.pause = pause;
        self
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn cache(&self) -> &ParquetCache {
        &self.cache
    }

    /// Resolve which periods `req` needs without downloading anything.
    pub fn plan(&self, req: &FetchRequest) -> Result<Plan, FetchError> {
        let (spec, start, end) = self.prepare(req)?;
        let transport = self.connector.connect()?;
        self.plan_with(transport.as_ref(), &spec, start, end)
    }

    pub fn fetch_data(&self, req: &FetchRequest) -> Result<DataFrame, FetchError> {
        self.fetch_data_with_cancel(req, &CancelToken::new())
    }

    /// Fetch `req`, stopping early with `Cancelled` once `cancel` fires.
    pub fn fetch_data_with_cancel(
        &self,
        req: &FetchRequest,
        cancel: &CancelToken,
    ) -> Result<DataFrame, FetchError> {
        let (spec, start, end) = self.prepare(req)?;
        cancel.check()?;

        // One connection pool for the whole request, dropped on every return.
        let transport = self.connector.connect()?;
        let plan = self.plan_with(transport.as_ref(), &spec, start, end)?;

        let periods: Vec<Period> = plan
            .periods()
            .filter(|p| spec.kind.has_daily_archives() || matches!(p, Period::Month { .. }))
            .collect();

        let batch = Batch {
            client: self,
            spec: &spec,
            tz: &req.timezone,
            cache_write: req.cache_write,
            total: periods.len(),
        };

        let loaded = if req.concurrent {
            self.run_concurrent(&batch, transport.as_ref(), &periods, req.rate_limit, cancel)?
        } else {
            self.run_sequential(&batch, transport.as_ref(), &periods, cancel)?
        };

        let mut summary = BatchSummary {
            total: periods.len(),
            ..Default::default()
        };
        let frames: Vec<DataFrame> = loaded
            .into_iter()
            .filter_map(|(df, outcome)| {
                summary.record(outcome);
                df
            })
            .collect();
        self.progress.on_batch_complete(&summary);

        let table = concat(frames, spec.kind, &req.timezone)?;
        clip(table, start, end)
    }

    fn prepare(
        &self,
        req: &FetchRequest,
    ) -> Result<(ArchiveSpec, NaiveDateTime, NaiveDateTime), FetchError> {
        req.validate()?;
        let spec = ArchiveSpec::new(req.kind, req.segment, req.normalized_symbol(), req.interval)?;
        let (start, end) = req.utc_window()?;
        Ok((spec, start, end))
    }

    fn plan_with(
        &self,
        transport: &dyn Transport,
        spec: &ArchiveSpec,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Plan, FetchError> {
        let remote = RemoteProber::new(transport);
        let prober = CacheAwareProber::new(&self.cache, &remote);
        let plan = planner::plan(&prober, &self.config.base_url, spec, start, end)?;
        debug!(
            "plan for {} {}: {} months, {} days",
            spec.symbol,
            spec.kind,
            plan.months.len(),
            plan.days.len()
        );
        Ok(plan)
    }

    fn run_sequential(
        &self,
        batch: &Batch<'_>,
        transport: &dyn Transport,
        periods: &[Period],
        cancel: &CancelToken,
    ) -> Result<Vec<Loaded>, FetchError> {
        let fetch = |url: &str| fetch_once(transport, url);
        periods
            .iter()
            .enumerate()
            .map(|(index, &period)| {
                cancel.check()?;
                batch.load_period(index, period, &fetch)
            })
            .collect()
    }

    /// All periods go to a private worker pool sharing one transport and one
    /// rate limiter. The first hard failure cancels the rest of the batch.
    fn run_concurrent(
        &self,
        batch: &Batch<'_>,
        transport: &dyn Transport,
        periods: &[Period],
        rate_limit: Option<f64>,
        cancel: &CancelToken,
    ) -> Result<Vec<Loaded>, FetchError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers.max(1))
            .build()
            .map_err(|e| FetchError::Other(format!("failed to build worker pool: {e}")))?;

        let batch_cancel = cancel.child();
        let limiter = RateLimiter::new(rate_limit);
        let fetcher = ConcurrentFetcher::new(
            transport,
            &limiter,
            self.config.retry_policy(),
            &batch_cancel,
            self.pause.as_ref(),
        );
        let fetch = |url: &str| fetcher.fetch(url);

        let results: Vec<Result<Loaded, FetchError>> = pool.install(|| {
            periods
                .par_iter()
                .enumerate()
                .map(|(index, &period)| {
                    batch_cancel.check()?;
                    let result = batch.load_period(index, period, &fetch);
                    if matches!(&result, Err(e) if !matches!(e, FetchError::Cancelled)) {
                        batch_cancel.cancel();
                    }
                    result
                })
                .collect()
        });

        settle(results, cancel)
    }

    /// Candles for `symbol` at `interval`.
    pub fn fetch_klines(
        &self,
        symbol: &str,
        segment: Segment,
        interval: Interval,
        start: NaiveDateTime,
        end: NaiveDateTime,
        tz: &str,
    ) -> Result<DataFrame, FetchError> {
        let req = FetchRequest::new(symbol, segment, DataKind::Klines, start, end)
            .with_interval(interval)
            .with_timezone(tz);
        self.fetch_data(&req)
    }

    pub fn fetch_trades(
        &self,
        symbol: &str,
        segment: Segment,
        start: NaiveDateTime,
        end: NaiveDateTime,
        tz: &str,
    ) -> Result<DataFrame, FetchError> {
        self.fetch_kind(DataKind::Trades, symbol, segment, start, end, tz)
    }

    pub fn fetch_agg_trades(
        &self,
        symbol: &str,
        segment: Segment,
        start: NaiveDateTime,
        end: NaiveDateTime,
        tz: &str,
    ) -> Result<DataFrame, FetchError> {
        self.fetch_kind(DataKind::AggTrades, symbol, segment, start, end, tz)
    }

    pub fn fetch_book_ticker(
        &self,
        symbol: &str,
        segment: Segment,
        start: NaiveDateTime,
        end: NaiveDateTime,
        tz: &str,
    ) -> Result<DataFrame, FetchError> {
        self.fetch_kind(DataKind::BookTicker, symbol, segment, start, end, tz)
    }

    pub fn fetch_funding_rate(
        &self,
        symbol: &str,
        segment: Segment,
        start: NaiveDateTime,
        end: NaiveDateTime,
        tz: &str,
    ) -> Result<DataFrame, FetchError> {
        self.fetch_kind(DataKind::FundingRate, symbol, segment, start, end, tz)
    }

    pub fn fetch_metrics(
        &self,
        symbol: &str,
        segment: Segment,
        start: NaiveDateTime,
        end: NaiveDateTime,
        tz: &str,
    ) -> Result<DataFrame, FetchError> {
        self.fetch_kind(DataKind::Metrics, symbol, segment, start, end, tz)
    }

    fn fetch_kind(
        &self,
        kind: DataKind,
        symbol: &str,
        segment: Segment,
        start: NaiveDateTime,
        end: NaiveDateTime,
        tz: &str,
    ) -> Result<DataFrame, FetchError> {
        let req = FetchRequest::new(symbol, segment, kind, start, end).with_timezone(tz);
        self.fetch_data(&req)
    }
}

type Loaded = (Option<DataFrame>, PeriodOutcome);

/// Per-request context shared by every period.
struct Batch<'a> {
    client: &'a HistoryClient,
    spec: &'a ArchiveSpec,
    tz: &'a str,
    cache_write: bool,
    total: usize,
}

impl Batch<'_> {
    /// Cache first, then download and decode. A missing archive is a warning.
    fn load_period(
        &self,
        index: usize,
        period: Period,
        fetch: &(dyn Fn(&str) -> Result<Vec<u8>, FetchError> + Sync),
    ) -> Result<Loaded, FetchError> {
        let client = self.client;
        let url = self.spec.url(&client.config.base_url, period)?;
        let archive = archive_name(&url);
        client.progress.on_start(archive, index, self.total);

        let loaded = match self.load_cached(&url)? {
            Some(df) => (Some(df), PeriodOutcome::Cached),
            None => match fetch(&url) {
                Ok(bytes) => {
                    let df = decode(self.spec.kind, self.tz, &bytes)?;
                    if let Err(e) = client.cache.store(&url, &df, self.cache_write) {
                        warn!("failed to cache {archive}: {e}");
                    }
                    (Some(df), PeriodOutcome::Fetched)
                }
                Err(FetchError::DataNotFound { url }) => {
                    warn!("data not found: {url}");
                    (None, PeriodOutcome::Missing)
                }
                Err(e) => return Err(e),
            },
        };

        client
            .progress
            .on_complete(archive, index, self.total, loaded.1);
        Ok(loaded)
    }

    /// A cached table with the wrong layout is ignored and re-fetched.
    fn load_cached(&self, url: &str) -> Result<Option<DataFrame>, FetchError> {
        let Some(df) = self.client.cache.load(url, self.tz)? else {
            return Ok(None);
        };
        match self.spec.kind.schema().validate(&df) {
            Ok(()) => Ok(Some(df)),
            Err(e) => {
                warn!("ignoring cached {url}: {e}");
                Ok(None)
            }
        }
    }
}

fn archive_name(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

/// Caller cancellation wins; otherwise the first real error in period order.
fn settle(
    results: Vec<Result<Loaded, FetchError>>,
    cancel: &CancelToken,
) -> Result<Vec<Loaded>, FetchError> {
    if cancel.is_cancelled() {
        return Err(FetchError::Cancelled);
    }
    let mut loaded = Vec::with_capacity(results.len());
    let mut cancelled = false;
    for result in results {
        match result {
            Ok(period) => loaded.push(period),
            Err(FetchError::Cancelled) => cancelled = true,
            Err(e) => return Err(e),
        }
    }
    if cancelled {
        Err(FetchError::Cancelled)
    } else {
        Ok(loaded)
    }
}

/// Stack frames in period order; no frames gives an empty table.
fn concat(frames: Vec<DataFrame>, kind: DataKind, tz: &str) -> Result<DataFrame, FetchError> {
    let mut frames = frames.into_iter();
    let Some(mut table) = frames.next() else {
        return Ok(kind.schema().empty(tz));
    };
    for df in frames {
        table
            .vstack_mut(&df)
            .map_err(|e| FetchError::Decode(format!("concatenate: {e}")))?;
    }
    Ok(table)
}

/// Keep rows with `start <= datetime < end` (naive UTC bounds).
fn clip(df: DataFrame, start: NaiveDateTime, end: NaiveDateTime) -> Result<DataFrame, FetchError> {
    let map_err = |e: PolarsError| FetchError::Decode(format!("clip: {e}"));
    let lo = start.and_utc().timestamp_millis();
    let hi = end.and_utc().timestamp_millis();

    let millis = df
        .column(DATETIME_COLUMN)
        .map_err(map_err)?
        .cast(&DataType::Int64)
        .map_err(map_err)?;
    let mask: BooleanChunked = millis
        .i64()
        .map_err(map_err)?
        .into_iter()
        .map(|v| v.is_some_and(|v| v >= lo && v < hi))
        .collect();
    df.filter(&mask).map_err(map_err)
}
