//! Archive existence checks.
//!
//! The remote prober issues a HEAD request and fails closed: anything other
//! than 200 or 404 is an error, never "does not exist".

use log::debug;

use super::cache::ParquetCache;
use super::provider::{FetchError, Transport};

/// Answers whether an archive URL is published.
pub trait ExistenceCheck {
    fn exists(&self, url: &str) -> Result<bool, FetchError>;
}

/// HEAD-based check against the archive server.
pub struct RemoteProber<'a> {
    transport: &'a dyn Transport,
}

impl<'a> RemoteProber<'a> {
    pub fn new(transport: &'a dyn Transport) -> Self {
        Self { transport }
    }
}

impl ExistenceCheck for RemoteProber<'_> {
    fn exists(&self, url: &str) -> Result<bool, FetchError> {
        let status = self.transport.head(url)?;
        debug!("probe {status} {url}");
        match status {
            200 => Ok(true),
            404 => Ok(false),
            other => Err(FetchError::Network(format!("HTTP {other} probing {url}"))),
        }
    }
}

/// Treats a locally cached archive as proof of publication and only asks
/// `inner` about the rest.
pub struct CacheAwareProber<'a> {
    cache: &'a ParquetCache,
    inner: &'a dyn ExistenceCheck,
}

impl<'a> CacheAwareProber<'a> {
    pub fn new(cache: &'a ParquetCache, inner: &'a dyn ExistenceCheck) -> Self {
        Self { cache, inner }
    }
}

impl ExistenceCheck for CacheAwareProber<'_> {
    fn exists(&self, url: &str) -> Result<bool, FetchError> {
        if self.cache.contains(url) {
            debug!("probe skipped, cached: {url}");
            return Ok(true);
        }
        self.inner.exists(url)
    }
}
