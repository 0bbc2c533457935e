//! End-to-end tests of the fetch pipeline against an in-memory archive server.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use common::*;
use histvault_core::data::{
    ArchiveSpec, BatchSummary, CancelToken, DownloadProgress, FetchError, PeriodOutcome,
    DATETIME_COLUMN,
};
use histvault_core::domain::{DataKind, Interval, Period, Segment};
use histvault_core::FetchRequest;
use polars::prelude::*;

fn at(date: chrono::NaiveDate) -> NaiveDateTime {
    date.and_hms_opt(0, 0, 0).unwrap()
}

fn spec() -> ArchiveSpec {
    ArchiveSpec::new(DataKind::Klines, Segment::Spot, "BTCUSDT", Some(Interval::D1)).unwrap()
}

fn request(start: NaiveDateTime, end: NaiveDateTime) -> FetchRequest {
    FetchRequest::new("btc/usdt", Segment::Spot, DataKind::Klines, start, end)
        .with_interval(Interval::D1)
}

/// Jan and Feb 2024 bundled monthly, March 1-9 only daily.
fn seeded_server() -> Arc<MockServer> {
    let server = MockServer::new();
    let spec = spec();
    publish_month(&server, &spec, 2024, 1);
    publish_month(&server, &spec, 2024, 2);
    for day in 1..=9 {
        publish_day(&server, &spec, date(2024, 3, day));
    }
    server
}

fn datetimes(df: &DataFrame) -> Vec<i64> {
    df.column(DATETIME_COLUMN)
        .unwrap()
        .cast(&DataType::Int64)
        .unwrap()
        .i64()
        .unwrap()
        .into_no_null_iter()
        .collect()
}

#[test]
fn months_then_days_in_order() {
    let server = seeded_server();
    let dir = tempfile::tempdir().unwrap();
    let client = client(&server, dir.path());

    let df = client
        .fetch_data(&request(at(date(2024, 1, 1)), at(date(2024, 3, 10))))
        .unwrap();

    assert_eq!(df.height(), 31 + 29 + 9);
    assert!(DataKind::Klines.schema().validate(&df).is_ok());
    let times = datetimes(&df);
    assert!(times.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(times[0], day_ms(date(2024, 1, 1)));
    assert_eq!(*times.last().unwrap(), day_ms(date(2024, 3, 9)));
    assert_eq!(server.live.load(Ordering::SeqCst), 0);
}

#[test]
fn window_inside_month_is_clipped() {
    let server = seeded_server();
    let dir = tempfile::tempdir().unwrap();
    let client = client(&server, dir.path());

    let df = client
        .fetch_data(&request(at(date(2024, 1, 5)), at(date(2024, 1, 10))))
        .unwrap();
    let times = datetimes(&df);
    assert_eq!(times.len(), 5);
    assert_eq!(times[0], day_ms(date(2024, 1, 5)));
    assert_eq!(times[4], day_ms(date(2024, 1, 9)));
    // One probe and one download.
    assert_eq!(server.gets.load(Ordering::SeqCst), 1);
}

#[test]
fn second_cached_request_hits_no_network() {
    let server = seeded_server();
    let dir = tempfile::tempdir().unwrap();
    let client = client(&server, dir.path());
    let req = request(at(date(2024, 1, 10)), at(date(2024, 2, 20))).cache_write(true);

    let first = client.fetch_data(&req).unwrap();
    assert!(server.requests() > 0);

    server.reset_counts();
    let second = client.fetch_data(&req).unwrap();
    assert_eq!(server.requests(), 0);
    assert!(first.equals_missing(&second));
}

#[test]
fn cache_is_not_written_unless_enabled() {
    let server = seeded_server();
    let dir = tempfile::tempdir().unwrap();
    let client = client(&server, dir.path());

    client
        .fetch_data(&request(at(date(2024, 1, 1)), at(date(2024, 1, 31))))
        .unwrap();
    assert_eq!(client.cache().status().unwrap().files, 0);
}

#[test]
fn missing_daily_archive_is_skipped() {
    let server = seeded_server();
    server.remove(&spec().url(BASE_URL, Period::Day(date(2024, 3, 4))).unwrap());
    let dir = tempfile::tempdir().unwrap();
    let client = client(&server, dir.path());

    let df = client
        .fetch_data(&request(at(date(2024, 3, 1)), at(date(2024, 3, 10))))
        .unwrap();
    assert_eq!(df.height(), 8);
    assert!(!datetimes(&df).contains(&day_ms(date(2024, 3, 4))));
}

#[test]
fn missing_daily_archive_is_skipped_concurrently() {
    let server = seeded_server();
    server.remove(&spec().url(BASE_URL, Period::Day(date(2024, 3, 4))).unwrap());
    let dir = tempfile::tempdir().unwrap();
    let client = client(&server, dir.path());

    let req = request(at(date(2024, 2, 20)), at(date(2024, 3, 10)))
        .concurrent(true)
        .rate_limit(None);
    let df = client.fetch_data(&req).unwrap();

    assert_eq!(df.height(), 10 + 8);
    let times = datetimes(&df);
    assert!(!times.contains(&day_ms(date(2024, 3, 4))));
    assert!(times.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(server.live.load(Ordering::SeqCst), 0);
}

#[test]
fn nothing_published_gives_empty_table() {
    let server = MockServer::new();
    let dir = tempfile::tempdir().unwrap();
    let client = client(&server, dir.path());

    let df = client
        .fetch_data(&request(at(date(2024, 1, 1)), at(date(2024, 1, 3))))
        .unwrap();
    assert_eq!(df.height(), 0);
    assert!(DataKind::Klines.schema().validate(&df).is_ok());
}

#[test]
fn concurrent_matches_sequential() {
    let server = seeded_server();
    let dir = tempfile::tempdir().unwrap();
    let client = client(&server, dir.path());
    let req = request(at(date(2024, 1, 1)), at(date(2024, 3, 10))).rate_limit(None);

    let sequential = client.fetch_data(&req).unwrap();
    let concurrent = client.fetch_data(&req.clone().concurrent(true)).unwrap();
    assert!(sequential.equals_missing(&concurrent));
    assert_eq!(server.live.load(Ordering::SeqCst), 0);
}

#[test]
fn concurrent_retries_transport_failures() {
    let server = seeded_server();
    let url = spec().url(BASE_URL, Period::Day(date(2024, 3, 2))).unwrap();
    let body = zip_csv("day.csv", &daily_candles(date(2024, 3, 2), date(2024, 3, 3)));
    server.route(
        url,
        Route::FailThen {
            remaining: AtomicUsize::new(2),
            body,
        },
    );

    let dir = tempfile::tempdir().unwrap();
    let pause = Arc::new(RecordingPause::default());
    let client = client(&server, dir.path()).with_pause(pause.clone());
    let req = request(at(date(2024, 3, 1)), at(date(2024, 3, 4)))
        .concurrent(true)
        .rate_limit(None);

    let df = client.fetch_data(&req).unwrap();
    assert_eq!(df.height(), 3);
    assert_eq!(
        *pause.0.lock().unwrap(),
        vec![Duration::ZERO, Duration::from_secs(2)]
    );
}

#[test]
fn concurrent_hard_failure_is_reported() {
    let server = seeded_server();
    let url = spec().url(BASE_URL, Period::Day(date(2024, 3, 5))).unwrap();
    server.route(url, Route::Status(500));

    let dir = tempfile::tempdir().unwrap();
    let client = client(&server, dir.path()).with_pause(Arc::new(RecordingPause::default()));
    let req = request(at(date(2024, 3, 1)), at(date(2024, 3, 10)))
        .concurrent(true)
        .rate_limit(None);

    let result = client.fetch_data(&req);
    assert!(matches!(result, Err(FetchError::Network(_))));
    assert_eq!(server.live.load(Ordering::SeqCst), 0);
}

/// Cancels `token` once `after` periods have completed.
struct CancelAfter {
    token: CancelToken,
    after: usize,
    done: AtomicUsize,
}

impl DownloadProgress for CancelAfter {
    fn on_start(&self, _archive: &str, _index: usize, _total: usize) {}

    fn on_complete(&self, _archive: &str, _index: usize, _total: usize, _outcome: PeriodOutcome) {
        if self.done.fetch_add(1, Ordering::SeqCst) + 1 >= self.after {
            self.token.cancel();
        }
    }

    fn on_batch_complete(&self, _summary: &BatchSummary) {}
}

#[test]
fn cancellation_returns_cancelled_and_closes_the_pool() {
    let server = seeded_server();
    let dir = tempfile::tempdir().unwrap();
    let token = CancelToken::new();
    let client = client(&server, dir.path()).with_progress(Arc::new(CancelAfter {
        token: token.clone(),
        after: 1,
        done: AtomicUsize::new(0),
    }));
    // Slow enough that most periods are still queued when the token fires.
    let req = request(at(date(2024, 1, 1)), at(date(2024, 3, 10)))
        .concurrent(true)
        .rate_limit(Some(20.0));

    let result = client.fetch_data_with_cancel(&req, &token);
    assert!(matches!(result, Err(FetchError::Cancelled)));
    assert_eq!(server.connects.load(Ordering::SeqCst), 1);
    assert_eq!(server.live.load(Ordering::SeqCst), 0);
}

#[test]
fn cancelled_before_start_does_nothing() {
    let server = seeded_server();
    let dir = tempfile::tempdir().unwrap();
    let client = client(&server, dir.path());
    let token = CancelToken::new();
    token.cancel();

    let result = client.fetch_data_with_cancel(&request(at(date(2024, 1, 1)), at(date(2024, 2, 1))), &token);
    assert!(matches!(result, Err(FetchError::Cancelled)));
    assert_eq!(server.requests(), 0);
}

#[test]
fn probe_failure_is_network_error() {
    let server = seeded_server();
    server.route(
        spec().url(BASE_URL, Period::Month { year: 2024, month: 2 }).unwrap(),
        Route::Status(503),
    );
    let dir = tempfile::tempdir().unwrap();
    let client = client(&server, dir.path());

    let result = client.fetch_data(&request(at(date(2024, 1, 1)), at(date(2024, 2, 10))));
    assert!(matches!(result, Err(FetchError::Network(_))));
    assert_eq!(server.gets.load(Ordering::SeqCst), 0);
}

#[test]
fn invalid_requests_never_connect() {
    let server = seeded_server();
    let dir = tempfile::tempdir().unwrap();
    let client = client(&server, dir.path());

    let backwards = request(at(date(2024, 2, 1)), at(date(2024, 1, 1)));
    assert!(matches!(client.fetch_data(&backwards), Err(FetchError::InvalidRequest(_))));

    let spot_funding = FetchRequest::new(
        "BTCUSDT",
        Segment::Spot,
        DataKind::FundingRate,
        at(date(2024, 1, 1)),
        at(date(2024, 2, 1)),
    );
    assert!(matches!(client.fetch_data(&spot_funding), Err(FetchError::InvalidRequest(_))));
    assert_eq!(server.connects.load(Ordering::SeqCst), 0);
}

#[test]
fn request_timezone_labels_and_shifts_window() {
    let server = seeded_server();
    let dir = tempfile::tempdir().unwrap();
    let client = client(&server, dir.path());
    // 2024-01-05 00:00 in Shanghai is 2024-01-04 16:00 UTC.
    let req = request(at(date(2024, 1, 5)), at(date(2024, 1, 10))).with_timezone("Asia/Shanghai");

    let df = client.fetch_data(&req).unwrap();
    assert_eq!(
        df.column(DATETIME_COLUMN).unwrap().dtype(),
        &DataType::Datetime(TimeUnit::Milliseconds, Some("Asia/Shanghai".into()))
    );
    let times = datetimes(&df);
    assert_eq!(times.first(), Some(&day_ms(date(2024, 1, 5))));
    assert_eq!(times.last(), Some(&day_ms(date(2024, 1, 9))));
}

#[test]
fn plan_reports_months_and_days() {
    let server = seeded_server();
    let dir = tempfile::tempdir().unwrap();
    let client = client(&server, dir.path());

    let plan = client
        .plan(&request(at(date(2024, 1, 1)), at(date(2024, 3, 10))))
        .unwrap();
    assert_eq!(plan.months.len(), 2);
    assert_eq!(plan.days.len(), 9);
    assert_eq!(server.gets.load(Ordering::SeqCst), 0);
}

#[test]
fn funding_rate_fetches_months_only() {
    let server = MockServer::new();
    let spec = ArchiveSpec::new(DataKind::FundingRate, Segment::LinearDerivatives, "BTCUSDT", None)
        .unwrap();
    let url = spec.url(BASE_URL, Period::Month { year: 2024, month: 1 }).unwrap();
    let body = "calc_time,funding_interval_hours,last_funding_rate\n1704067200000,8,0.0001\n1704096000000,8,0.0002\n";
    server.route(url, Route::Archive(zip_csv("funding.csv", body)));

    let dir = tempfile::tempdir().unwrap();
    let client = client(&server, dir.path());
    let df = client
        .fetch_funding_rate(
            "BTCUSDT",
            Segment::LinearDerivatives,
            at(date(2024, 1, 1)),
            at(date(2024, 2, 15)),
            "UTC",
        )
        .unwrap();
    assert_eq!(df.height(), 2);
    assert_eq!(server.gets.load(Ordering::SeqCst), 1);
}

#[test]
fn fetch_klines_shortcut_matches_request() {
    let server = seeded_server();
    let dir = tempfile::tempdir().unwrap();
    let client = client(&server, dir.path());

    let shortcut = client
        .fetch_klines(
            "BTCUSDT",
            Segment::Spot,
            Interval::D1,
            at(date(2024, 2, 20)),
            at(date(2024, 3, 5)),
            "UTC",
        )
        .unwrap();
    let full = client
        .fetch_data(&request(at(date(2024, 2, 20)), at(date(2024, 3, 5))))
        .unwrap();
    assert!(shortcut.equals_missing(&full));
    assert_eq!(shortcut.height(), 10 + 4);
}

#[test]
fn metrics_parse_formatted_timestamps() {
    let server = MockServer::new();
    let spec = ArchiveSpec::new(DataKind::Metrics, Segment::LinearDerivatives, "BTCUSDT", None)
        .unwrap();
    let url = spec.url(BASE_URL, Period::Day(date(2024, 7, 1))).unwrap();
    let body = "create_time,symbol,sum_open_interest,sum_open_interest_value,count_toptrader_long_short_ratio,sum_toptrader_long_short_ratio,count_long_short_ratio,sum_taker_long_short_vol_ratio\n\
2024-07-01 00:05:00,BTCUSDT,80000.5,5000000000.0,1.5,1.2,1.6,0.9\n\
2024-07-01 00:10:00,BTCUSDT,80010.0,5000100000.0,1.4,1.1,,1.1\n";
    server.route(url, Route::Archive(zip_csv("metrics.csv", body)));

    let dir = tempfile::tempdir().unwrap();
    let client = client(&server, dir.path());
    let df = client
        .fetch_metrics(
            "BTCUSDT",
            Segment::LinearDerivatives,
            at(date(2024, 7, 1)),
            at(date(2024, 7, 2)),
            "UTC",
        )
        .unwrap();

    assert_eq!(df.height(), 2);
    assert_eq!(datetimes(&df)[0], day_ms(date(2024, 7, 1)) + 5 * 60_000);
    assert_eq!(df.column("count_long_short_ratio").unwrap().null_count(), 1);
}
