//! Security subsystem: the request-defense layer.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → payload.rs (body ceiling, long-field truncation)
//!     → token.rs + secrets.rs (bearer verification, claims)
//!     → rate_limit.rs (tier quota per subject or address)
//!     → login.rs (lockout on credential routes)
//!     → business handler (upstream)
//! ```
//!
//! # Design Decisions
//! - Defense in depth: every stage may short-circuit with a rejection
//! - Fail closed: store timeouts deny, verification errors reject
//! - No trust in client input (identity headers are stripped)

pub mod headers;
pub mod login;
pub mod payload;
pub mod rate_limit;
pub mod secrets;
pub mod source;
pub mod store;
pub mod token;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::clock::SharedClock;
use crate::config::schema::DefenseConfig;
use crate::error::SecretError;
use crate::routing::PolicyRouter;

use self::headers::TrustedProxies;
use self::login::{LockoutPolicy, LoginGuard};
use self::payload::RequestGuard;
use self::rate_limit::RateLimiter;
use self::secrets::{Secret, SecretRing};
use self::store::MemoryStore;
use self::token::TokenManager;

#[derive(Debug, Error)]
pub enum DefenseError {
    #[error("secret ring: {0}")]
    Secrets(#[from] SecretError),
    #[error("trusted proxies: {0}")]
    TrustedProxies(#[from] ipnet::AddrParseError),
}

/// Every defense component, wired once at startup and shared by the
/// pipeline and the admin API.
pub struct Defense {
    pub tokens: Arc<TokenManager>,
    pub rate_limiter: Arc<RateLimiter>,
    pub login_guard: Arc<LoginGuard>,
    pub request_guard: RequestGuard,
    pub routes: Arc<PolicyRouter>,
    pub trusted_proxies: TrustedProxies,
    pub store: Arc<MemoryStore>,
    pub username_field: String,
    pub clock: SharedClock,
}

impl Defense {
    pub fn from_config(config: &DefenseConfig, secrets: Vec<Secret>, clock: SharedClock) -> Result<Self, DefenseError> {
        let ring = Arc::new(SecretRing::new(secrets, clock.clone())?);
        let tokens = Arc::new(TokenManager::new(
            ring,
            clock.clone(),
            Duration::from_secs(config.tokens.access_ttl_secs),
            Duration::from_secs(config.tokens.refresh_ttl_secs),
        ));

        let store = Arc::new(MemoryStore::new(clock.clone()));
        let deadline = Duration::from_millis(config.store.timeout_ms);

        let rate_limiter = Arc::new(RateLimiter::from_config(&config.rate_limit, store.clone(), deadline));
        let login_guard = Arc::new(LoginGuard::new(
            store.clone(),
            LockoutPolicy::from_config(&config.login),
            clock.clone(),
            deadline,
        ));

        Ok(Self {
            tokens,
            rate_limiter,
            login_guard,
            request_guard: RequestGuard::from_config(&config.payload),
            routes: Arc::new(PolicyRouter::from_config(config)),
            trusted_proxies: TrustedProxies::parse(&config.security.trusted_proxies)?,
            store,
            username_field: config.login.username_field.clone(),
            clock,
        })
    }

    /// Drop counter entries that can no longer affect a decision.
    pub fn purge_expired(&self) -> usize {
        self.store.purge_expired(self.login_guard.policy())
    }
}
