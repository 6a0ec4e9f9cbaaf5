//! Brute-force login lockout.
//!
//! # Policy
//! - Failures are counted per `(username, client address)` pair
//! - `threshold` consecutive failures lock the identifier for `base_lockout`
//! - Each further failure in the same streak, including attempts made while
//!   locked, re-locks for `base * multiplier^(k - threshold)`, capped at
//!   `max_lockout`
//! - One success clears the record entirely
//!
//! # Design Decisions
//! - Locked identifiers are rejected before the credential check runs
//! - A credential check reserves its slot before it runs, so concurrent
//!   guesses cannot outnumber the attempts left before the lock
//! - Store failures are treated as locked (fail closed)

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::clock::{retry_after_secs, SharedClock};
use crate::config::schema::LoginConfig;
use crate::error::StoreError;
use crate::security::store::{within, Admission, AttemptOutcome, AttemptStore, LoginAttemptRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockoutPolicy {
    pub threshold: u32,
    pub observation_window: Duration,
    pub base_lockout: Duration,
    pub backoff_multiplier: u32,
    pub max_lockout: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            threshold: 5,
            observation_window: Duration::from_secs(15 * 60),
            base_lockout: Duration::from_secs(60),
            backoff_multiplier: 2,
            max_lockout: Duration::from_secs(60 * 60),
        }
    }
}

impl LockoutPolicy {
    pub fn from_config(config: &LoginConfig) -> Self {
        Self {
            threshold: config.threshold,
            observation_window: Duration::from_secs(config.observation_window_secs),
            base_lockout: Duration::from_secs(config.base_lockout_secs),
            backoff_multiplier: config.backoff_multiplier,
            max_lockout: Duration::from_secs(config.max_lockout_secs),
        }
    }

    /// Lock duration after the `failure_count`-th consecutive failure, or
    /// `None` while still under the threshold.
    pub fn lockout_for(&self, failure_count: u32) -> Option<Duration> {
        if self.threshold == 0 || failure_count < self.threshold {
            return None;
        }
        let steps = failure_count - self.threshold;
        let base = self.base_lockout.as_millis() as u64;
        let max = self.max_lockout.as_millis() as u64;

        let factor = (self.backoff_multiplier.max(1) as u64).checked_pow(steps);
        let millis = factor
            .and_then(|f| base.checked_mul(f))
            .map_or(max, |d| d.min(max));
        Some(Duration::from_millis(millis))
    }
}

/// Composite `(username, address)` key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoginIdentifier(String);

impl LoginIdentifier {
    pub fn new(username: &str, address: impl std::fmt::Display) -> Self {
        Self(format!("{}|{}", username.trim().to_lowercase(), address))
    }

    /// Wrap an already composed identifier (admin unlock).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LoginIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum LockStatus {
    Open { failures: u32, remaining_attempts: u32 },
    Locked { retry_after: u64 },
}

impl LockStatus {
    pub fn is_locked(&self) -> bool {
        matches!(self, LockStatus::Locked { .. })
    }
}

pub struct LoginGuard {
    store: Arc<dyn AttemptStore>,
    policy: LockoutPolicy,
    clock: SharedClock,
    deadline: Duration,
}

impl LoginGuard {
    pub fn new(store: Arc<dyn AttemptStore>, policy: LockoutPolicy, clock: SharedClock, deadline: Duration) -> Self {
        Self {
            store,
            policy,
            clock,
            deadline,
        }
    }

    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    /// Count a failed attempt and report the resulting lock state.
    pub async fn record_failure(&self, id: &LoginIdentifier) -> Result<LockStatus, StoreError> {
        let now = self.clock.now_millis();
        let record = within(
            self.deadline,
            self.store.record_failure(id.as_str(), now, &self.policy),
        )
        .await?;

        let status = self.status_of(&record, now);
        match status {
            LockStatus::Locked { retry_after } => tracing::warn!(
                identifier = %id,
                failures = record.failure_count,
                retry_after,
                "Login locked"
            ),
            LockStatus::Open { failures, .. } => {
                tracing::info!(identifier = %id, failures, "Login failure recorded")
            }
        }
        Ok(status)
    }

    pub async fn record_success(&self, id: &LoginIdentifier) -> Result<(), StoreError> {
        if within(self.deadline, self.store.clear(id.as_str())).await? {
            tracing::debug!(identifier = %id, "Login streak cleared");
        }
        Ok(())
    }

    /// `Some(retry_after_secs)` while locked.
    pub async fn is_locked(&self, id: &LoginIdentifier) -> Result<Option<u64>, StoreError> {
        let now = self.clock.now_millis();
        let record = within(self.deadline, self.store.get(id.as_str())).await?;
        Ok(record.and_then(|r| match self.status_of(&r, now) {
            LockStatus::Locked { retry_after } => Some(retry_after),
            LockStatus::Open { .. } => None,
        }))
    }

    /// Reserve a credential check for `id`. A refusal carries the seconds
    /// the caller should wait; refusals of a locked identifier extend the
    /// lock.
    pub async fn begin(&self, id: &LoginIdentifier) -> Result<Attempt<'_>, StoreError> {
        let now = self.clock.now_millis();
        let admission = within(
            self.deadline,
            self.store.begin_attempt(id.as_str(), now, &self.policy),
        )
        .await?;

        Ok(match admission {
            Admission::Granted => Attempt::Proceed(AttemptPermit {
                guard: self,
                id: id.clone(),
                settled: false,
            }),
            Admission::Locked(record) => {
                let retry_after = record
                    .locked_until
                    .map_or(1, |until| retry_after_secs(now, until));
                tracing::warn!(
                    identifier = %id,
                    failures = record.failure_count,
                    retry_after,
                    "Login attempt on locked identifier"
                );
                Attempt::Refused { retry_after }
            }
            Admission::Saturated => {
                tracing::warn!(identifier = %id, "Login attempts already in flight");
                Attempt::Refused {
                    retry_after: SATURATED_RETRY_SECS,
                }
            }
        })
    }

    async fn finish(&self, id: &LoginIdentifier, outcome: AttemptOutcome) -> Result<LockStatus, StoreError> {
        let now = self.clock.now_millis();
        let record = within(
            self.deadline,
            self.store.finish_attempt(id.as_str(), outcome, now, &self.policy),
        )
        .await?;
        Ok(record.map_or(
            LockStatus::Open {
                failures: 0,
                remaining_attempts: self.policy.threshold,
            },
            |r| self.status_of(&r, now),
        ))
    }

    /// Operator override; removes the record regardless of state.
    pub async fn clear(&self, id: &LoginIdentifier) -> Result<bool, StoreError> {
        within(self.deadline, self.store.clear(id.as_str())).await
    }

    fn status_of(&self, record: &LoginAttemptRecord, now: u64) -> LockStatus {
        match record.locked_until {
            Some(until) if now < until => LockStatus::Locked {
                retry_after: retry_after_secs(now, until),
            },
            _ => {
                let failures = if record.streak_expired(now, &self.policy) {
                    0
                } else {
                    record.failure_count
                };
                LockStatus::Open {
                    failures,
                    remaining_attempts: self.policy.threshold.saturating_sub(failures),
                }
            }
        }
    }
}

/// Wait suggested when every remaining attempt is already being checked.
const SATURATED_RETRY_SECS: u64 = 1;

pub enum Attempt<'a> {
    Proceed(AttemptPermit<'a>),
    Refused { retry_after: u64 },
}

/// A reserved credential check. Settle it with one of the consuming
/// methods; a permit dropped unsettled (including after a store error while
/// settling) frees its slot in the background.
pub struct AttemptPermit<'a> {
    guard: &'a LoginGuard,
    id: LoginIdentifier,
    settled: bool,
}

impl AttemptPermit<'_> {
    pub fn identifier(&self) -> &LoginIdentifier {
        &self.id
    }

    pub async fn succeed(mut self) -> Result<(), StoreError> {
        self.guard.finish(&self.id, AttemptOutcome::Succeeded).await?;
        self.settled = true;
        tracing::debug!(identifier = %self.id, "Login streak cleared");
        Ok(())
    }

    pub async fn fail(mut self) -> Result<LockStatus, StoreError> {
        let status = self.guard.finish(&self.id, AttemptOutcome::Failed).await?;
        self.settled = true;
        match status {
            LockStatus::Locked { retry_after } => {
                tracing::warn!(identifier = %self.id, retry_after, "Login locked")
            }
            LockStatus::Open { failures, .. } => {
                tracing::info!(identifier = %self.id, failures, "Login failure recorded")
            }
        }
        Ok(status)
    }

    pub async fn abandon(mut self) -> Result<(), StoreError> {
        self.guard.finish(&self.id, AttemptOutcome::Abandoned).await?;
        self.settled = true;
        Ok(())
    }
}

impl Drop for AttemptPermit<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let store = self.guard.store.clone();
        let policy = self.guard.policy.clone();
        let now = self.guard.clock.now_millis();
        let id = self.id.clone();
        handle.spawn(async move {
            if let Err(e) = store
                .finish_attempt(id.as_str(), AttemptOutcome::Abandoned, now, &policy)
                .await
            {
                tracing::error!(identifier = %id, error = %e, "Failed to release login attempt");
            }
        });
    }
}
