//! Parquet cache keyed by archive URL.
//!
//! Layout: `{root}/{url path}` with the `.zip` extension replaced by
//! `.parquet`, e.g. `.cache/data/spot/monthly/klines/BTCUSDT/1h/BTCUSDT-1h-2024-01.parquet`.
//!
//! Features:
//! - Atomic writes (write to a unique temp sibling, rename into place)
//! - Quarantine for unreadable files (`{filename}.quarantined`)
//! - Timestamps relabelled to the caller's timezone on load
//!
//! Concurrent stores to the same path are last-writer-wins; readers only ever
//! see a complete file.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, warn};
use polars::prelude::*;

use super::provider::FetchError;
use super::schema::DATETIME_COLUMN;

/// Default cache root, relative to the working directory.
pub const DEFAULT_CACHE_DIR: &str = ".cache";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// The Parquet cache.
#[derive(Debug, Clone)]
pub struct ParquetCache {
    root: PathBuf,
}

/// File count and size of everything under the cache root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatus {
    pub files: usize,
    pub bytes: u64,
    pub quarantined: usize,
}

impl ParquetCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_root(&self) -> Result<(), FetchError> {
        fs::create_dir_all(&self.root)
            .map_err(|e| FetchError::Cache(format!("failed to create {}: {e}", self.root.display())))
    }

    /// Local path for an archive URL.
    pub fn path_for(&self, url: &str) -> Result<PathBuf, FetchError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| FetchError::Cache(format!("invalid archive URL '{url}': {e}")))?;
        let relative = parsed.path().trim_start_matches('/');
        if relative.is_empty() {
            return Err(FetchError::Cache(format!("archive URL has no path: {url}")));
        }
        Ok(self.root.join(relative).with_extension("parquet"))
    }

    pub fn contains(&self, url: &str) -> bool {
        self.path_for(url).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Load the cached table for `url`, labelled with `tz`.
    ///
    /// A file that cannot be read is moved aside and reported as a miss.
    pub fn load(&self, url: &str, tz: &str) -> Result<Option<DataFrame>, FetchError> {
        let path = self.path_for(url)?;
        if !path.is_file() {
            return Ok(None);
        }

        match read_parquet(&path).and_then(|df| relabel(df, tz)) {
            Ok(df) => {
                debug!("cache hit: {}", path.display());
                Ok(Some(df))
            }
            Err(e) => {
                let quarantine = path.with_extension("parquet.quarantined");
                warn!(
                    "quarantining unreadable cache file {}: {e}",
                    path.display()
                );
                let _ = fs::rename(&path, &quarantine);
                Ok(None)
            }
        }
    }

    /// Store `df` for `url`. No-op unless `enabled`.
    pub fn store(&self, url: &str, df: &DataFrame, enabled: bool) -> Result<(), FetchError> {
        if !enabled {
            return Ok(());
        }
        let path = self.path_for(url)?;
        if let Some(parent) = path.parent() {
            // Another worker creating the same directory is fine.
            fs::create_dir_all(parent)
                .map_err(|e| FetchError::Cache(format!("failed to create dir: {e}")))?;
        }

        let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_path = path.with_extension(format!("parquet.{}.{n}.tmp", std::process::id()));

        if let Err(e) = write_parquet(df, &tmp_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            FetchError::Cache(format!("atomic rename failed: {e}"))
        })
    }

    /// Walk the cache root.
    pub fn status(&self) -> Result<CacheStatus, FetchError> {
        let mut status = CacheStatus::default();
        if self.root.is_dir() {
            walk(&self.root, &mut status)?;
        }
        Ok(status)
    }
}

fn walk(dir: &Path, status: &mut CacheStatus) -> Result<(), FetchError> {
    let entries =
        fs::read_dir(dir).map_err(|e| FetchError::Cache(format!("read dir: {e}")))?;
    for entry in entries {
        let entry = entry.map_err(|e| FetchError::Cache(format!("dir entry: {e}")))?;
        let path = entry.path();
        if path.is_dir() {
            walk(&path, status)?;
            continue;
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some("parquet") => {
                status.files += 1;
                status.bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
            Some("quarantined") => status.quarantined += 1,
            _ => {}
        }
    }
    Ok(())
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn write_parquet(df: &DataFrame, path: &Path) -> Result<(), FetchError> {
    let file =
        fs::File::create(path).map_err(|e| FetchError::Parquet(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .map_err(|e| FetchError::Parquet(format!("write parquet: {e}")))?;
    Ok(())
}

fn read_parquet(path: &Path) -> Result<DataFrame, FetchError> {
    let file = fs::File::open(path).map_err(|e| FetchError::Parquet(format!("open: {e}")))?;
    ParquetReader::new(file)
        .finish()
        .map_err(|e| FetchError::Parquet(format!("read: {e}")))
}

/// Re-label the `datetime` column with `tz`. The instants are unchanged.
fn relabel(mut df: DataFrame, tz: &str) -> Result<DataFrame, FetchError> {
    let map_err = |e: PolarsError| FetchError::Parquet(format!("datetime column: {e}"));

    let column = df.column(DATETIME_COLUMN).map_err(map_err)?;
    if !matches!(
        column.dtype(),
        DataType::Datetime(TimeUnit::Milliseconds, _)
    ) {
        return Err(FetchError::Parquet(format!(
            "'{DATETIME_COLUMN}' has type {:?}",
            column.dtype()
        )));
    }
    let millis = column.cast(&DataType::Int64).map_err(map_err)?;
    let relabelled: Column = millis
        .i64()
        .map_err(map_err)?
        .clone()
        .into_datetime(TimeUnit::Milliseconds, Some(tz.into()))
        .into_series()
        .into();
    df.with_column(relabelled).map_err(map_err)?;
    Ok(df)
}
