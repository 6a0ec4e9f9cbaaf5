//! Route lookup.
//!
//! # Responsibilities
//! - Store compiled route policies
//! - Look up the policy for a request path
//! - Fall back to the default policy when nothing matches
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) path prefix scan (acceptable for typical route counts)
//! - Login and refresh endpoints are always matched first
//! - Paths are normalized before lookup; see [`normalize_path`]

use std::sync::Arc;

use crate::config::schema::DefenseConfig;
use crate::routing::matcher::{normalize_path, ExactPathMatcher, Matcher, PathPrefixMatcher};

/// What the defense pipeline does for a matched request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePolicy {
    pub name: String,
    /// Rate limit tier; `None` means not rate limited.
    pub tier: Option<String>,
    /// Require a valid access token.
    pub authenticated: bool,
    /// Credential submission guarded by the lockout policy.
    pub login: bool,
    /// Served by the gateway's refresh handler, never forwarded.
    pub refresh: bool,
    pub long_text_fields: Vec<String>,
    pub max_field_length: Option<usize>,
}

#[derive(Debug)]
struct CompiledRoute {
    matcher: Box<dyn Matcher>,
    priority: u32,
    policy: Arc<RoutePolicy>,
}

#[derive(Debug)]
pub struct PolicyRouter {
    routes: Vec<CompiledRoute>,
    fallback: Arc<RoutePolicy>,
}

impl PolicyRouter {
    pub fn from_config(config: &DefenseConfig) -> Self {
        let tier_of = |tier: &Option<String>| {
            if config.rate_limit.enabled {
                tier.clone().or_else(|| config.rate_limit.default_tier.clone())
            } else {
                None
            }
        };

        let mut routes = vec![
            CompiledRoute {
                matcher: Box::new(ExactPathMatcher::new(&config.login.path)),
                priority: u32::MAX,
                policy: Arc::new(RoutePolicy {
                    name: "login".to_string(),
                    tier: tier_of(&config.login.tier),
                    authenticated: false,
                    login: true,
                    refresh: false,
                    long_text_fields: Vec::new(),
                    max_field_length: None,
                }),
            },
            CompiledRoute {
                matcher: Box::new(ExactPathMatcher::new(&config.tokens.refresh_path)),
                priority: u32::MAX,
                policy: Arc::new(RoutePolicy {
                    name: "refresh".to_string(),
                    tier: tier_of(&config.login.tier),
                    authenticated: false,
                    login: false,
                    refresh: true,
                    long_text_fields: Vec::new(),
                    max_field_length: None,
                }),
            },
        ];

        routes.extend(config.routing.routes.iter().map(|route| CompiledRoute {
            matcher: Box::new(PathPrefixMatcher::new(&route.path_prefix)),
            priority: route.priority,
            policy: Arc::new(RoutePolicy {
                name: route.name.clone(),
                tier: tier_of(&route.tier),
                authenticated: route.authenticated.unwrap_or(config.routing.authenticate_by_default),
                login: false,
                refresh: false,
                long_text_fields: route.long_text_fields.clone(),
                max_field_length: route.max_field_length,
            }),
        }));

        // Highest priority first, then most specific.
        routes.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.matcher.specificity().cmp(&a.matcher.specificity()))
        });

        let fallback = Arc::new(RoutePolicy {
            name: "default".to_string(),
            tier: tier_of(&None),
            authenticated: config.routing.authenticate_by_default,
            login: false,
            refresh: false,
            long_text_fields: Vec::new(),
            max_field_length: None,
        });

        tracing::debug!(routes = routes.len(), "Route policies compiled");
        Self { routes, fallback }
    }

    /// Policy for `path`. Spellings the upstream would treat as the same
    /// route (case, doubled slashes, dot segments) resolve to the same policy.
    pub fn match_path(&self, path: &str) -> Arc<RoutePolicy> {
        let path = normalize_path(path);
        self.routes
            .iter()
            .find(|r| r.matcher.matches(&path))
            .map(|r| r.policy.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::RouteConfig;

    fn route(name: &str, prefix: &str, priority: u32) -> RouteConfig {
        RouteConfig {
            name: name.into(),
            path_prefix: prefix.into(),
            tier: Some("strict".into()),
            authenticated: Some(false),
            long_text_fields: vec!["note".into()],
            max_field_length: None,
            priority,
        }
    }

    fn config() -> DefenseConfig {
        let mut config = DefenseConfig::default();
        config.routing.routes = vec![
            route("api", "/api", 0),
            route("reports", "/api/reports", 0),
            route("public", "/public", 5),
        ];
        config
    }

    #[test]
    fn test_login_and_refresh_resolved() {
        let router = PolicyRouter::from_config(&config());
        let login = router.match_path("/auth/login");
        assert!(login.login);
        assert!(!login.authenticated);
        assert_eq!(login.tier.as_deref(), Some("strict"));
        assert_eq!(router.match_path("/auth/refresh").name, "refresh");
    }

    #[test]
    fn test_login_path_variants_resolve_to_login() {
        let router = PolicyRouter::from_config(&config());
        for variant in [
            "/Auth/Login",
            "//auth/login",
            "/auth//login",
            "/auth/./login",
            "/auth/login/",
            "/auth/x/../login",
        ] {
            let policy = router.match_path(variant);
            assert_eq!(policy.name, "login", "{variant}");
            assert!(policy.login, "{variant}");
        }
        assert!(router.match_path("/AUTH/refresh").refresh);
        assert_eq!(router.match_path("/Api/Reports/7").name, "reports");
    }

    #[test]
    fn test_most_specific_prefix_wins() {
        let router = PolicyRouter::from_config(&config());
        assert_eq!(router.match_path("/api/reports/7").name, "reports");
        assert_eq!(router.match_path("/api/expenses").name, "api");
        assert_eq!(router.match_path("/public/x").name, "public");
    }

    #[test]
    fn test_fallback_uses_defaults() {
        let router = PolicyRouter::from_config(&config());
        let policy = router.match_path("/rooms/1");
        assert_eq!(policy.name, "default");
        assert!(policy.authenticated);
        assert_eq!(policy.tier.as_deref(), Some("loose"));
    }

    #[test]
    fn test_disabled_rate_limit_clears_tiers() {
        let mut config = config();
        config.rate_limit.enabled = false;
        let router = PolicyRouter::from_config(&config);
        assert_eq!(router.match_path("/api").tier, None);
        assert_eq!(router.match_path("/auth/login").tier, None);
    }
}
