//! Archive download with retry and exponential backoff.

use std::time::Duration;

use log::debug;

use super::cancel::{CancelToken, Pause};
use super::provider::{FetchError, Transport};
use super::rate_limiter::RateLimiter;

/// Single GET. 404 is `DataNotFound`; any other non-200 is `Network`.
pub fn fetch_once(transport: &dyn Transport, url: &str) -> Result<Vec<u8>, FetchError> {
    let resp = transport.get(url)?;
    match resp.status {
        200 => Ok(resp.body),
        404 => Err(FetchError::DataNotFound {
            url: url.to_string(),
        }),
        status => Err(FetchError::Network(format!("HTTP {status} for {url}"))),
    }
}

/// Retry schedule for the concurrent fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Wait after failed attempt `attempt` (0-based): nothing after the first
    /// failure, then `base_delay * 2^attempt`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            Duration::ZERO
        } else {
            self.base_delay
                .saturating_mul(2u32.saturating_pow(attempt))
        }
    }
}

/// Fetcher used by the workers of one concurrent batch.
///
/// Every attempt first takes a rate-limiter token. Only `Network` failures
/// are retried.
pub struct ConcurrentFetcher<'a> {
    transport: &'a dyn Transport,
    limiter: &'a RateLimiter,
    policy: RetryPolicy,
    cancel: &'a CancelToken,
    pause: &'a dyn Pause,
}

impl<'a> ConcurrentFetcher<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        limiter: &'a RateLimiter,
        policy: RetryPolicy,
        cancel: &'a CancelToken,
        pause: &'a dyn Pause,
    ) -> Self {
        Self {
            transport,
            limiter,
            policy,
            cancel,
            pause,
        }
    }

    pub fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let attempts = self.policy.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            self.cancel.check()?;
            self.limiter.acquire(self.cancel)?;
            // A cancel during the network read still wins.
            match fetch_once(self.transport, url).and_then(|body| {
                self.cancel.check()?;
                Ok(body)
            }) {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    let delay = self.policy.delay_after(attempt);
                    debug!(
                        "attempt {}/{attempts} failed for {url}: {e}; retrying in {delay:?}",
                        attempt + 1
                    );
                    last_error = Some(e);
                    self.pause.pause(delay, self.cancel)?;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| FetchError::Other("max retries exceeded".into())))
    }
}
