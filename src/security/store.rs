//! Counter store for rate windows and login attempt records.
//!
//! # Responsibilities
//! - Fixed-window counters keyed by `(scope, identity)` strings
//! - Login attempt records with atomic read-modify-write
//! - Login attempt reservations: a credential check is admitted only while
//!   `failures + in_flight` stays under the lock threshold
//! - Bounded calls: every pipeline call goes through [`within`]
//!
//! # Design Decisions
//! - Windows align to wall-clock boundaries: `start = now - now % size`
//! - Window starts only move forward; a late observer never rewinds one
//! - The in-memory store serializes per key through the `DashMap` shard
//!   lock held by `entry()`, so increments never interleave
//! - Traits are async so a networked store can stand in for multi-process
//!   deployments

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;

use crate::clock::SharedClock;
use crate::error::StoreError;
use crate::security::login::LockoutPolicy;

/// State of a counter right after an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub count: u64,
    /// Window start, epoch millis.
    pub window_start: u64,
    /// Time left until the window rolls over.
    pub resets_in: Duration,
}

#[async_trait]
pub trait CounterStore: Send + Sync + 'static {
    /// Count one event for `key` in the current `window`.
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowSnapshot, StoreError>;

    /// Count in the key's current window, zero if it has rolled over.
    async fn peek(&self, key: &str) -> Result<u64, StoreError>;

    async fn reset(&self, key: &str) -> Result<(), StoreError>;
}

/// Failed-login bookkeeping for one `(username, address)` identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginAttemptRecord {
    pub identifier: String,
    pub failure_count: u32,
    /// Epoch millis.
    pub first_failure_at: u64,
    pub last_failure_at: u64,
    pub locked_until: Option<u64>,
    /// Admitted attempts whose upstream verdict is still pending.
    pub in_flight: u32,
}

impl LoginAttemptRecord {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            failure_count: 0,
            first_failure_at: 0,
            last_failure_at: 0,
            locked_until: None,
            in_flight: 0,
        }
    }

    /// True when the streak has lapsed. Below the threshold all failures must
    /// fall inside one observation window counted from the first; once the
    /// threshold is reached the window slides with each failure and the
    /// streak outlives any running lock.
    pub fn streak_expired(&self, now: u64, policy: &LockoutPolicy) -> bool {
        let window = policy.observation_window.as_millis() as u64;
        let anchor = if self.failure_count < policy.threshold {
            self.first_failure_at
        } else {
            self.last_failure_at
        };
        let window_end = anchor.saturating_add(window);
        now >= window_end.max(self.locked_until.unwrap_or(0))
    }

    pub fn is_locked_at(&self, now: u64) -> bool {
        self.locked_until.is_some_and(|until| now < until)
    }

    /// Failures that still count toward the lock at `now`.
    pub fn live_failures(&self, now: u64, policy: &LockoutPolicy) -> u32 {
        if self.streak_expired(now, policy) {
            0
        } else {
            self.failure_count
        }
    }

    /// Try to reserve a credential check. Below the threshold the slots are
    /// the attempts left before the lock; past it, one at a time.
    pub fn admit(&mut self, now: u64, policy: &LockoutPolicy) -> Admission {
        if self.is_locked_at(now) {
            self.register_failure(now, policy);
            return Admission::Locked(self.clone());
        }

        let slots = policy
            .threshold
            .saturating_sub(self.live_failures(now, policy))
            .max(1);
        if self.in_flight >= slots {
            return Admission::Saturated;
        }
        self.in_flight += 1;
        Admission::Granted
    }

    /// Settle one admitted attempt.
    pub fn settle(&mut self, outcome: AttemptOutcome, now: u64, policy: &LockoutPolicy) {
        self.in_flight = self.in_flight.saturating_sub(1);
        match outcome {
            AttemptOutcome::Succeeded => {
                self.failure_count = 0;
                self.first_failure_at = 0;
                self.last_failure_at = 0;
                self.locked_until = None;
            }
            AttemptOutcome::Failed => self.register_failure(now, policy),
            AttemptOutcome::Abandoned => {}
        }
    }

    /// Nothing pending and nothing left to remember.
    pub fn is_idle(&self, now: u64, policy: &LockoutPolicy) -> bool {
        self.in_flight == 0 && (self.failure_count == 0 || self.streak_expired(now, policy))
    }

    /// Apply one failed attempt at `now`.
    pub fn register_failure(&mut self, now: u64, policy: &LockoutPolicy) {
        if self.failure_count == 0 || self.streak_expired(now, policy) {
            self.failure_count = 0;
            self.first_failure_at = now;
            self.locked_until = None;
        }

        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure_at = now;

        if let Some(lockout) = policy.lockout_for(self.failure_count) {
            let until = now.saturating_add(lockout.as_millis() as u64);
            // Extending only; a shorter computed lock never shortens one in force.
            self.locked_until = Some(self.locked_until.map_or(until, |cur| cur.max(until)));
        }
    }
}

/// Answer to a reservation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Slot reserved; settle it with [`AttemptStore::finish_attempt`].
    Granted,
    /// The identifier is locked. The refused attempt counted as a failure.
    Locked(LoginAttemptRecord),
    /// Every attempt left before the lock is already in flight.
    Saturated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    Failed,
    /// No verdict (upstream error, dropped request). Only the slot is freed.
    Abandoned,
}

#[async_trait]
pub trait AttemptStore: Send + Sync + 'static {
    /// Atomically apply a failure and return the updated record.
    async fn record_failure(
        &self,
        identifier: &str,
        now: u64,
        policy: &LockoutPolicy,
    ) -> Result<LoginAttemptRecord, StoreError>;

    /// Check the lock and reserve a slot in one atomic step.
    async fn begin_attempt(
        &self,
        identifier: &str,
        now: u64,
        policy: &LockoutPolicy,
    ) -> Result<Admission, StoreError>;

    /// Release a slot taken by [`AttemptStore::begin_attempt`] and apply the
    /// verdict. Returns the record left behind, `None` once it is idle.
    async fn finish_attempt(
        &self,
        identifier: &str,
        outcome: AttemptOutcome,
        now: u64,
        policy: &LockoutPolicy,
    ) -> Result<Option<LoginAttemptRecord>, StoreError>;

    async fn get(&self, identifier: &str) -> Result<Option<LoginAttemptRecord>, StoreError>;

    /// Returns whether a record existed.
    async fn clear(&self, identifier: &str) -> Result<bool, StoreError>;
}

#[derive(Debug, Clone, Copy)]
struct Window {
    start: u64,
    size: u64,
    count: u64,
}

/// Single-process store backing both the rate limiter and the login guard.
#[derive(Debug)]
pub struct MemoryStore {
    windows: DashMap<String, Window>,
    attempts: DashMap<String, LoginAttemptRecord>,
    clock: SharedClock,
}

impl MemoryStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            windows: DashMap::new(),
            attempts: DashMap::new(),
            clock,
        }
    }

    /// Drop windows that have rolled over and attempt records whose streak
    /// has lapsed. Returns how many entries were removed.
    pub fn purge_expired(&self, policy: &LockoutPolicy) -> usize {
        let now = self.clock.now_millis();
        let before = self.windows.len() + self.attempts.len();

        self.windows.retain(|_, w| w.start.saturating_add(w.size) > now);
        self.attempts.retain(|_, r| !r.is_idle(now, policy));

        let removed = before.saturating_sub(self.windows.len() + self.attempts.len());
        if removed > 0 {
            tracing::debug!(removed, "Purged expired counter entries");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.windows.len() + self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowSnapshot, StoreError> {
        let now = self.clock.now_millis();
        let size = (window.as_millis() as u64).max(1);
        let start = now - now % size;

        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert(Window { start, size, count: 0 });

        if entry.size != size || start > entry.start {
            entry.start = entry.start.max(start);
            entry.size = size;
            entry.count = 0;
        }
        entry.count += 1;

        Ok(WindowSnapshot {
            count: entry.count,
            window_start: entry.start,
            resets_in: Duration::from_millis((entry.start + entry.size).saturating_sub(now)),
        })
    }

    async fn peek(&self, key: &str) -> Result<u64, StoreError> {
        let now = self.clock.now_millis();
        Ok(self
            .windows
            .get(key)
            .filter(|w| w.start.saturating_add(w.size) > now)
            .map(|w| w.count)
            .unwrap_or(0))
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        self.windows.remove(key);
        Ok(())
    }
}

#[async_trait]
impl AttemptStore for MemoryStore {
    async fn record_failure(
        &self,
        identifier: &str,
        now: u64,
        policy: &LockoutPolicy,
    ) -> Result<LoginAttemptRecord, StoreError> {
        let mut record = self
            .attempts
            .entry(identifier.to_string())
            .or_insert_with(|| LoginAttemptRecord::new(identifier));
        record.register_failure(now, policy);
        Ok(record.clone())
    }

    async fn begin_attempt(
        &self,
        identifier: &str,
        now: u64,
        policy: &LockoutPolicy,
    ) -> Result<Admission, StoreError> {
        let mut record = self
            .attempts
            .entry(identifier.to_string())
            .or_insert_with(|| LoginAttemptRecord::new(identifier));
        Ok(record.admit(now, policy))
    }

    async fn finish_attempt(
        &self,
        identifier: &str,
        outcome: AttemptOutcome,
        now: u64,
        policy: &LockoutPolicy,
    ) -> Result<Option<LoginAttemptRecord>, StoreError> {
        let settled = match self.attempts.entry(identifier.to_string()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().settle(outcome, now, policy);
                if entry.get().is_idle(now, policy) {
                    entry.remove();
                    None
                } else {
                    Some(entry.get().clone())
                }
            }
            // Cleared by an operator while the check ran.
            Entry::Vacant(entry) if outcome == AttemptOutcome::Failed => {
                let mut record = LoginAttemptRecord::new(identifier);
                record.register_failure(now, policy);
                Some(entry.insert(record).value().clone())
            }
            Entry::Vacant(_) => None,
        };
        Ok(settled)
    }

    async fn get(&self, identifier: &str) -> Result<Option<LoginAttemptRecord>, StoreError> {
        Ok(self.attempts.get(identifier).map(|r| r.clone()))
    }

    async fn clear(&self, identifier: &str) -> Result<bool, StoreError> {
        Ok(self.attempts.remove(identifier).is_some())
    }
}

/// Run a store call under a deadline. A timeout surfaces as
/// [`StoreError::Timeout`]; callers fail closed on any error.
pub async fn within<T, F>(deadline: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(deadline)),
    }
}
