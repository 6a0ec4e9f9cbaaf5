//! Tiered, role-aware rate limiting.

use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::schema::RateLimitConfig;
use crate::error::RateLimitError;
use crate::observability::metrics;
use crate::security::store::{within, CounterStore};
use crate::security::token::Claims;

/// Who a request is counted against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// Authenticated: keyed by subject so address hopping does not help.
    Subject(String),
    /// Anonymous: keyed by client address.
    Address(IpAddr),
}

impl Identity {
    fn key(&self) -> String {
        match self {
            Identity::Subject(sub) => format!("sub:{sub}"),
            Identity::Address(ip) => format!("ip:{ip}"),
        }
    }
}

/// Identity plus the roles that select a quota.
#[derive(Debug, Clone)]
pub struct Caller {
    pub identity: Identity,
    pub roles: BTreeSet<String>,
}

impl Caller {
    pub fn anonymous(ip: IpAddr) -> Self {
        Self {
            identity: Identity::Address(ip),
            roles: BTreeSet::new(),
        }
    }

    pub fn from_claims(claims: &Claims) -> Self {
        Self {
            identity: Identity::Subject(claims.sub.clone()),
            roles: claims.roles.clone(),
        }
    }
}

/// A named quota class applied to a group of routes.
#[derive(Debug, Clone)]
pub struct Tier {
    pub name: String,
    pub window: Duration,
    pub limit: u64,
    pub role_limits: HashMap<String, u64>,
}

impl Tier {
    /// The highest ceiling among the caller's roles, or the tier default.
    pub fn limit_for(&self, roles: &BTreeSet<String>) -> u64 {
        roles
            .iter()
            .filter_map(|r| self.role_limits.get(r))
            .copied()
            .max()
            .unwrap_or(self.limit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allow { limit: u64, remaining: u64 },
    Deny { limit: u64, retry_after: u64 },
}

impl RateDecision {
    /// `(limit, remaining)` when allowed.
    pub fn into_result(self) -> Result<(u64, u64), RateLimitError> {
        match self {
            RateDecision::Allow { limit, remaining } => Ok((limit, remaining)),
            RateDecision::Deny { retry_after, .. } => Err(RateLimitError::Exceeded { retry_after }),
        }
    }
}

pub struct RateLimiter {
    tiers: HashMap<String, Tier>,
    store: Arc<dyn CounterStore>,
    deadline: Duration,
}

impl RateLimiter {
    pub fn new(tiers: impl IntoIterator<Item = Tier>, store: Arc<dyn CounterStore>, deadline: Duration) -> Self {
        Self {
            tiers: tiers.into_iter().map(|t| (t.name.clone(), t)).collect(),
            store,
            deadline,
        }
    }

    pub fn from_config(config: &RateLimitConfig, store: Arc<dyn CounterStore>, deadline: Duration) -> Self {
        let tiers = config.tiers.iter().map(|(name, t)| Tier {
            name: name.clone(),
            window: Duration::from_secs(t.window_secs),
            limit: t.limit,
            role_limits: t.role_limits.clone(),
        });
        Self::new(tiers, store, deadline)
    }

    pub fn tier(&self, name: &str) -> Option<&Tier> {
        self.tiers.get(name)
    }

    /// Count this request against `tier` and decide.
    pub async fn check(&self, caller: &Caller, tier_name: &str) -> RateDecision {
        let Some(tier) = self.tiers.get(tier_name) else {
            tracing::warn!(tier = %tier_name, "Unknown rate limit tier, request not counted");
            return RateDecision::Allow {
                limit: u64::MAX,
                remaining: u64::MAX,
            };
        };

        let limit = tier.limit_for(&caller.roles);
        let key = format!("rl:{}:{}", tier.name, caller.identity.key());

        let snapshot = match within(self.deadline, self.store.increment(&key, tier.window)).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Counter store unavailable, denying");
                metrics::record_store_failure("rate_limit");
                return RateDecision::Deny { limit, retry_after: 1 };
            }
        };

        if snapshot.count > limit {
            let retry_after = snapshot.resets_in.as_millis().div_ceil(1000).max(1) as u64;
            tracing::warn!(
                key = %key,
                count = snapshot.count,
                limit,
                retry_after,
                "Rate limit exceeded"
            );
            RateDecision::Deny { limit, retry_after }
        } else {
            RateDecision::Allow {
                limit,
                remaining: limit - snapshot.count,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::StoreError;
    use crate::security::store::{MemoryStore, WindowSnapshot};
    use async_trait::async_trait;

    fn strict() -> Tier {
        Tier {
            name: "strict".into(),
            window: Duration::from_secs(60),
            limit: 5,
            role_limits: HashMap::from([("admin".to_string(), 20)]),
        }
    }

    fn limiter(clock: Arc<ManualClock>) -> RateLimiter {
        let store = Arc::new(MemoryStore::new(clock));
        RateLimiter::new([strict()], store, Duration::from_millis(50))
    }

    fn user(sub: &str, role: &str) -> Caller {
        Caller {
            identity: Identity::Subject(sub.into()),
            roles: BTreeSet::from([role.to_string()]),
        }
    }

    #[tokio::test]
    async fn test_strict_tier_sixth_request_denied() {
        // 10 s into a 60 s window.
        let clock = Arc::new(ManualClock::at_secs(610));
        let limiter = limiter(clock);
        let caller = user("alice", "user");

        for i in 1..=5 {
            assert_eq!(
                limiter.check(&caller, "strict").await,
                RateDecision::Allow { limit: 5, remaining: 5 - i }
            );
        }
        assert_eq!(
            limiter.check(&caller, "strict").await,
            RateDecision::Deny { limit: 5, retry_after: 50 }
        );
    }

    #[tokio::test]
    async fn test_window_rollover_restores_quota() {
        let clock = Arc::new(ManualClock::at_secs(600));
        let limiter = limiter(clock.clone());
        let caller = user("alice", "user");
        for _ in 0..6 {
            limiter.check(&caller, "strict").await;
        }
        clock.advance(Duration::from_secs(60));
        assert!(matches!(limiter.check(&caller, "strict").await, RateDecision::Allow { .. }));
    }

    #[tokio::test]
    async fn test_privileged_role_gets_higher_ceiling() {
        let clock = Arc::new(ManualClock::at_secs(600));
        let limiter = limiter(clock);
        let admin = user("root", "admin");
        for _ in 0..20 {
            assert!(matches!(limiter.check(&admin, "strict").await, RateDecision::Allow { .. }));
        }
        assert!(matches!(limiter.check(&admin, "strict").await, RateDecision::Deny { .. }));
    }

    #[tokio::test]
    async fn test_identities_are_isolated() {
        let clock = Arc::new(ManualClock::at_secs(600));
        let limiter = limiter(clock);
        let ip: IpAddr = "10.1.1.1".parse().unwrap();
        for _ in 0..6 {
            limiter.check(&Caller::anonymous(ip), "strict").await;
        }
        assert!(matches!(
            limiter.check(&Caller::anonymous(ip), "strict").await,
            RateDecision::Deny { .. }
        ));
        assert!(matches!(
            limiter.check(&user("bob", "user"), "strict").await,
            RateDecision::Allow { .. }
        ));
    }

    struct StalledStore;

    #[async_trait]
    impl CounterStore for StalledStore {
        async fn increment(&self, _key: &str, _window: Duration) -> Result<WindowSnapshot, StoreError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Err(StoreError::Backend("unreachable".into()))
        }

        async fn peek(&self, _key: &str) -> Result<u64, StoreError> {
            Ok(0)
        }

        async fn reset(&self, _key: &str) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_store_timeout_fails_closed() {
        let limiter = RateLimiter::new([strict()], Arc::new(StalledStore), Duration::from_millis(10));
        assert_eq!(
            limiter.check(&user("alice", "user"), "strict").await,
            RateDecision::Deny { limit: 5, retry_after: 1 }
        );
    }

    #[tokio::test]
    async fn test_unknown_tier_is_not_counted() {
        let limiter = limiter(Arc::new(ManualClock::default()));
        assert!(matches!(
            limiter.check(&user("alice", "user"), "missing").await,
            RateDecision::Allow { .. }
        ));
    }
}
