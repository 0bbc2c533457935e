//! Shared fixtures: an in-memory archive server and ZIP builders.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use histvault_core::data::{
    ArchiveSpec, CancelToken, Connector, FetchError, HttpResponse, Pause, Transport,
};
use histvault_core::domain::Period;
use histvault_core::{HistoryClient, VaultConfig};

pub const BASE_URL: &str = "http://archive.test";

pub enum Route {
    Archive(Vec<u8>),
    Status(u16),
    /// Transport failures for the first `remaining` GETs, then the archive.
    FailThen {
        remaining: AtomicUsize,
        body: Vec<u8>,
    },
}

/// Counts every request. URLs without a route answer 404.
#[derive(Default)]
pub struct MockServer {
    routes: Mutex<HashMap<String, Arc<Route>>>,
    pub heads: AtomicUsize,
    pub gets: AtomicUsize,
    pub connects: AtomicUsize,
    pub live: AtomicUsize,
}

impl MockServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn route(&self, url: impl Into<String>, route: Route) {
        self.routes.lock().unwrap().insert(url.into(), Arc::new(route));
    }

    pub fn remove(&self, url: &str) {
        self.routes.lock().unwrap().remove(url);
    }

    fn lookup(&self, url: &str) -> Option<Arc<Route>> {
        self.routes.lock().unwrap().get(url).cloned()
    }

    pub fn requests(&self) -> usize {
        self.heads.load(Ordering::SeqCst) + self.gets.load(Ordering::SeqCst)
    }

    pub fn reset_counts(&self) {
        self.heads.store(0, Ordering::SeqCst);
        self.gets.store(0, Ordering::SeqCst);
        self.connects.store(0, Ordering::SeqCst);
    }
}

pub struct MockConnector(pub Arc<MockServer>);

impl Connector for MockConnector {
    fn connect(&self) -> Result<Box<dyn Transport>, FetchError> {
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        self.0.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockTransport(Arc::clone(&self.0))))
    }
}

struct MockTransport(Arc<MockServer>);

impl Drop for MockTransport {
    fn drop(&mut self) {
        self.0.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Transport for MockTransport {
    fn head(&self, url: &str) -> Result<u16, FetchError> {
        self.0.heads.fetch_add(1, Ordering::SeqCst);
        Ok(match self.0.lookup(url).as_deref() {
            Some(Route::Archive(_)) | Some(Route::FailThen { .. }) => 200,
            Some(Route::Status(status)) => *status,
            None => 404,
        })
    }

    fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
        self.0.gets.fetch_add(1, Ordering::SeqCst);
        let ok = |body: &Vec<u8>| HttpResponse {
            status: 200,
            body: body.clone(),
        };
        match self.0.lookup(url).as_deref() {
            Some(Route::Archive(body)) => Ok(ok(body)),
            Some(Route::Status(status)) => Ok(HttpResponse {
                status: *status,
                body: Vec::new(),
            }),
            Some(Route::FailThen { remaining, body }) => {
                let left = remaining.load(Ordering::SeqCst);
                if left > 0 {
                    remaining.store(left - 1, Ordering::SeqCst);
                    Err(FetchError::Network(format!("connection reset: {url}")))
                } else {
                    Ok(ok(body))
                }
            }
            None => Ok(HttpResponse {
                status: 404,
                body: Vec::new(),
            }),
        }
    }
}

/// Records backoff waits instead of sleeping.
#[derive(Default)]
pub struct RecordingPause(pub Mutex<Vec<Duration>>);

impl Pause for RecordingPause {
    fn pause(&self, duration: Duration, cancel: &CancelToken) -> Result<(), FetchError> {
        self.0.lock().unwrap().push(duration);
        cancel.check()
    }
}

pub fn client(server: &Arc<MockServer>, cache_dir: &Path) -> HistoryClient {
    let config = VaultConfig {
        base_url: BASE_URL.to_string(),
        cache_dir: cache_dir.to_path_buf(),
        workers: 4,
        ..Default::default()
    };
    HistoryClient::with_connector(config, Arc::new(MockConnector(Arc::clone(server))))
}

pub fn zip_csv(name: &str, body: &str) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file(name, zip::write::SimpleFileOptions::default())
        .unwrap();
    writer.write_all(body.as_bytes()).unwrap();
    writer.finish().unwrap().into_inner()
}

pub fn day_ms(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp_millis()
}

/// One daily candle per day in `[from, to)`, with a header line.
pub fn daily_candles(from: NaiveDate, to: NaiveDate) -> String {
    let mut csv = String::from(
        "open_time,open,high,low,close,volume,close_time,quote_volume,count,taker_buy_volume,taker_buy_quote_volume,ignore\n",
    );
    let mut day = from;
    while day < to {
        let open = day_ms(day);
        let price = 40000.0 + day.ordinal() as f64;
        csv.push_str(&format!(
            "{open},{price},{},{},{price},12.5,{},500000.0,1000,6.0,240000.0,0\n",
            price + 10.0,
            price - 10.0,
            open + 86_399_999
        ));
        day = day.succ_opt().unwrap();
    }
    csv
}

/// Publish a monthly daily-candle archive for `spec`.
pub fn publish_month(server: &MockServer, spec: &ArchiveSpec, year: i32, month: u32) {
    let period = Period::Month { year, month };
    let url = spec.url(BASE_URL, period).unwrap();
    let body = daily_candles(period.first_day(), period.end().date());
    server.route(url, Route::Archive(zip_csv("month.csv", &body)));
}

/// Publish a daily archive for `spec`.
pub fn publish_day(server: &MockServer, spec: &ArchiveSpec, date: NaiveDate) {
    let url = spec.url(BASE_URL, Period::Day(date)).unwrap();
    let body = daily_candles(date, date.succ_opt().unwrap());
    server.route(url, Route::Archive(zip_csv("day.csv", &body)));
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}
