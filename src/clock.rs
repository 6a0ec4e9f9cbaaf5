//! Time sources.
//!
//! Every time-dependent component (token expiry, rate windows, lockouts)
//! reads time through a [`Clock`] handed to it at construction, so tests can
//! drive it with a [`ManualClock`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall-clock time source, millisecond resolution since the Unix epoch.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now_millis(&self) -> u64;

    fn now_secs(&self) -> u64 {
        self.now_millis() / 1000
    }
}

/// Shared handle passed to every component.
pub type SharedClock = Arc<dyn Clock>;

/// The real clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new(start_millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(start_millis),
        }
    }

    /// Start at a whole-second epoch offset.
    pub fn at_secs(secs: u64) -> Self {
        Self::new(secs * 1000)
    }

    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_millis(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Whole seconds until `deadline_millis`, rounded up and never below one.
///
/// Used for every `Retry-After` value so clients never get told to retry
/// immediately while still blocked.
pub fn retry_after_secs(now_millis: u64, deadline_millis: u64) -> u64 {
    let remaining = deadline_millis.saturating_sub(now_millis);
    remaining.div_ceil(1000).max(1)
}
