//! Cooperative cancellation for concurrent batches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::provider::FetchError;

/// Longest uninterrupted sleep while waiting; bounds cancellation latency.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Shared cancel flag. A child token observes its parent but cancelling the
/// child leaves the parent untouched.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    own: Arc<AtomicBool>,
    parent: Option<Arc<AtomicBool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(&self) -> Self {
        Self {
            own: Arc::new(AtomicBool::new(false)),
            parent: Some(Arc::clone(&self.own)),
        }
    }

    pub fn cancel(&self) {
        self.own.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.own.load(Ordering::Relaxed)
            || self
                .parent
                .as_ref()
                .is_some_and(|p| p.load(Ordering::Relaxed))
    }

    /// `Err(Cancelled)` once cancelled.
    pub fn check(&self) -> Result<(), FetchError> {
        if self.is_cancelled() {
            Err(FetchError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Waits between retries. Swappable so tests can record the schedule.
pub trait Pause: Send + Sync {
    fn pause(&self, duration: Duration, cancel: &CancelToken) -> Result<(), FetchError>;
}

/// Sleeps the current thread in short slices, returning early on cancel.
pub struct ThreadPause;

impl Pause for ThreadPause {
    fn pause(&self, duration: Duration, cancel: &CancelToken) -> Result<(), FetchError> {
        // `None` when the wait outlives `Instant`: sleep until cancelled.
        let deadline = Instant::now().checked_add(duration);
        loop {
            cancel.check()?;
            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(());
                    }
                    deadline - now
                }
                None => SLEEP_SLICE,
            };
            std::thread::sleep(remaining.min(SLEEP_SLICE));
        }
    }
}
