//! Token bucket rate limiter shared by one concurrent batch.
//!
//! The bucket holds at most one token, so requests are spaced evenly at the
//! configured rate rather than bursting.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, warn};

use super::cancel::{CancelToken, Pause, ThreadPause};
use super::provider::FetchError;

/// Bucket capacity; one token means no bursts.
const BUCKET_CAPACITY: f64 = 1.0;

#[derive(Debug)]
struct TokenBucket {
    /// Current number of available tokens.
    tokens: f64,
    /// Last time the bucket was updated.
    last_update: Instant,
    /// Tokens per second.
    rate: f64,
}

impl TokenBucket {
    fn new(rate: f64) -> Self {
        Self {
            tokens: BUCKET_CAPACITY,
            last_update: Instant::now(),
            rate,
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(BUCKET_CAPACITY);
        self.last_update = now;
    }

    fn try_acquire(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn time_until_available(&mut self) -> Duration {
        self.refill();
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            // Tiny rates overflow `Duration`; saturate instead.
            Duration::try_from_secs_f64((1.0 - self.tokens) / self.rate).unwrap_or(Duration::MAX)
        }
    }
}

/// Requests-per-second limiter. `None` (or a non-positive rate) is unlimited.
pub struct RateLimiter {
    bucket: Option<Mutex<TokenBucket>>,
}

impl RateLimiter {
    pub fn new(requests_per_second: Option<f64>) -> Self {
        let bucket = requests_per_second
            .filter(|r| r.is_finite() && *r > 0.0)
            .map(|r| Mutex::new(TokenBucket::new(r)));
        Self { bucket }
    }

    pub fn unlimited() -> Self {
        Self { bucket: None }
    }

    pub fn is_unlimited(&self) -> bool {
        self.bucket.is_none()
    }

    /// A poisoned bucket only means slightly wrong pacing, so recover it.
    fn lock(bucket: &Mutex<TokenBucket>) -> MutexGuard<'_, TokenBucket> {
        bucket.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Take a token without waiting.
    pub fn try_acquire(&self) -> bool {
        match &self.bucket {
            None => true,
            Some(bucket) => Self::lock(bucket).try_acquire(),
        }
    }

    /// Block until a token is available or `cancel` fires.
    ///
    /// The lock is released while sleeping.
    pub fn acquire(&self, cancel: &CancelToken) -> Result<(), FetchError> {
        let Some(bucket) = &self.bucket else {
            return cancel.check();
        };
        loop {
            cancel.check()?;
            let wait = {
                let mut guard = Self::lock(bucket);
                if guard.try_acquire() {
                    return Ok(());
                }
                guard.time_until_available()
            };
            debug!("Rate limiter: waiting {wait:?}");
            ThreadPause.pause(wait, cancel)?;
        }
    }
}
