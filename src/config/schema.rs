//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::security::source::{RunMode, SECRETS_ENV};

/// Root configuration for the defense gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DefenseConfig {
    /// `development` falls back to an ephemeral secret; `production` refuses to start without one.
    pub mode: RunMode,

    /// Listener configuration (bind address, connection ceiling).
    pub listener: ListenerConfig,

    /// The business application requests are forwarded to.
    pub upstream: UpstreamConfig,

    /// Token issuance and signing secrets.
    pub tokens: TokenConfig,

    /// Named rate limit tiers.
    pub rate_limit: RateLimitConfig,

    /// Login route and lockout policy.
    pub login: LoginConfig,

    /// Body size and long-text field ceilings.
    pub payload: PayloadConfig,

    /// Counter store deadlines and housekeeping.
    pub store: StoreConfig,

    /// Per-route defense policies.
    pub routing: RoutingConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Client address trust.
    pub security: SecurityConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent in-flight requests (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Upstream address (e.g., "127.0.0.1:3000").
    pub address: String,

    /// Time allowed for the upstream to answer, in seconds.
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:3000".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Token lifetimes and secret sources.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenConfig {
    pub access_ttl_secs: u64,
    pub refresh_ttl_secs: u64,

    /// Environment variable holding the ordered secret list (first = active).
    pub secrets_env: String,

    /// Path of the locally served refresh endpoint.
    pub refresh_path: String,

    /// Secrets used when the environment variable is unset.
    pub secrets: Vec<SecretEntry>,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            access_ttl_secs: 15 * 60,
            refresh_ttl_secs: 7 * 24 * 60 * 60,
            secrets_env: SECRETS_ENV.to_string(),
            refresh_path: "/auth/refresh".to_string(),
            secrets: Vec::new(),
        }
    }
}

/// One configured signing secret. The first entry is active.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SecretEntry {
    pub id: String,
    pub secret: String,
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
}

fn default_algorithm() -> String {
    "HS256".to_string()
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Tier applied to routes that name none.
    pub default_tier: Option<String>,

    /// Tier name to quota.
    pub tiers: BTreeMap<String, TierConfig>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let mut tiers = BTreeMap::new();
        tiers.insert(
            "strict".to_string(),
            TierConfig {
                window_secs: 60,
                limit: 5,
                role_limits: HashMap::new(),
            },
        );
        tiers.insert(
            "loose".to_string(),
            TierConfig {
                window_secs: 60,
                limit: 100,
                role_limits: HashMap::from([("admin".to_string(), 1000)]),
            },
        );
        Self {
            enabled: true,
            default_tier: Some("loose".to_string()),
            tiers,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TierConfig {
    /// Fixed window length in seconds.
    pub window_secs: u64,

    /// Requests allowed per window for callers without a role override.
    pub limit: u64,

    /// Role-specific ceilings; a caller gets the highest that applies.
    #[serde(default)]
    pub role_limits: HashMap<String, u64>,
}

/// Login route and brute-force lockout policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoginConfig {
    /// Path of the login route (forwarded upstream).
    pub path: String,

    /// JSON body field carrying the username.
    pub username_field: String,

    /// Rate limit tier for login and refresh.
    pub tier: Option<String>,

    /// Consecutive failures before the first lock.
    pub threshold: u32,

    /// Failures further apart than this start a new streak.
    pub observation_window_secs: u64,

    pub base_lockout_secs: u64,
    pub backoff_multiplier: u32,
    pub max_lockout_secs: u64,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            path: "/auth/login".to_string(),
            username_field: "username".to_string(),
            tier: Some("strict".to_string()),
            threshold: 5,
            observation_window_secs: 15 * 60,
            base_lockout_secs: 60,
            backoff_multiplier: 2,
            max_lockout_secs: 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PayloadConfig {
    /// Maximum request body size in bytes.
    pub max_body_bytes: u64,

    /// Default character ceiling for long-text fields.
    pub max_field_length: usize,
}

impl Default for PayloadConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 1024 * 1024, // 1MB
            max_field_length: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Deadline for a single counter store call.
    pub timeout_ms: u64,

    /// Interval between expired entry sweeps.
    pub purge_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 50,
            purge_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Require a bearer token on routes that do not say otherwise.
    pub authenticate_by_default: bool,

    /// Route policies, matched by path prefix.
    pub routes: Vec<RouteConfig>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            authenticate_by_default: true,
            routes: Vec::new(),
        }
    }
}

/// Defense policy for a group of paths.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route identifier for logging.
    pub name: String,

    /// Path prefix to match, on segment boundaries.
    pub path_prefix: String,

    /// Rate limit tier; falls back to `rate_limit.default_tier`.
    #[serde(default)]
    pub tier: Option<String>,

    /// Overrides `routing.authenticate_by_default`.
    #[serde(default)]
    pub authenticated: Option<bool>,

    /// JSON body fields truncated to the field ceiling.
    #[serde(default)]
    pub long_text_fields: Vec<String>,

    /// Overrides `payload.max_field_length` for this route.
    #[serde(default)]
    pub max_field_length: Option<usize>,

    /// Route priority (higher = checked first).
    #[serde(default)]
    pub priority: u32,
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SecurityConfig {
    /// Peers (CIDR) whose `X-Forwarded-For` is trusted.
    pub trusted_proxies: Vec<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error), overridden by `RUST_LOG`.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable the Prometheus exporter.
    pub prometheus_enabled: bool,

    /// Prometheus exporter bind address.
    pub prometheus_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            prometheus_enabled: false,
            prometheus_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

/// Rejected by validation outside development.
pub const PLACEHOLDER_API_KEY: &str = "CHANGE_ME_IN_PRODUCTION";

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: PLACEHOLDER_API_KEY.to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_round_trip_through_toml() {
        let config = DefenseConfig::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: DefenseConfig = toml::from_str(&text).unwrap();

        assert_eq!(parsed.tokens.access_ttl_secs, 900);
        assert_eq!(parsed.tokens.refresh_ttl_secs, 604_800);
        assert_eq!(parsed.rate_limit.tiers["strict"].limit, 5);
        assert_eq!(parsed.login.threshold, 5);
        assert_eq!(parsed.store.timeout_ms, 50);
        assert_eq!(parsed.mode, RunMode::Development);
    }

    #[test]
    fn test_minimal_file_fills_defaults() {
        let config: DefenseConfig = toml::from_str(
            r#"
            mode = "production"

            [upstream]
            address = "10.0.0.5:3000"

            [[tokens.secrets]]
            id = "k1"
            secret = "0123456789abcdef0123456789abcdef"

            [rate_limit.tiers.reports]
            window_secs = 3600
            limit = 10
            role_limits = { auditor = 100 }

            [[routing.routes]]
            name = "expenses"
            path_prefix = "/api/expenses"
            tier = "loose"
            long_text_fields = ["description"]
            "#,
        )
        .unwrap();

        assert_eq!(config.mode, RunMode::Production);
        assert_eq!(config.upstream.timeout_secs, 30);
        assert_eq!(config.tokens.secrets[0].algorithm, "HS256");
        assert_eq!(config.rate_limit.tiers["reports"].role_limits["auditor"], 100);
        assert!(!config.rate_limit.tiers.contains_key("strict"));
        assert_eq!(config.routing.routes[0].authenticated, None);
        assert_eq!(config.observability.log_format, LogFormat::Pretty);
    }
}
