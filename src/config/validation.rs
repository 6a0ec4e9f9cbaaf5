//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (routes and login reference existing tiers)
//! - Validate value ranges (windows > 0, ttls ordered, addresses parse)
//! - Reject secrets that could never sign
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: DefenseConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use ipnet::IpNet;
use thiserror::Error;

use crate::config::schema::{DefenseConfig, PLACEHOLDER_API_KEY};
use crate::security::secrets::{Secret, SigningAlgorithm};
use crate::security::source::RunMode;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &DefenseConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }

    if config.upstream.address.trim().is_empty() {
        errors.push(ValidationError::new("upstream.address", "must not be empty"));
    }
    if config.upstream.timeout_secs == 0 {
        errors.push(ValidationError::new("upstream.timeout_secs", "must be greater than 0"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    validate_tokens(config, &mut errors);
    validate_tiers(config, &mut errors);
    validate_login(config, &mut errors);
    validate_routes(config, &mut errors);

    if config.payload.max_body_bytes == 0 {
        errors.push(ValidationError::new("payload.max_body_bytes", "must be greater than 0"));
    }
    if config.payload.max_field_length == 0 {
        errors.push(ValidationError::new("payload.max_field_length", "must be greater than 0"));
    }
    if config.store.timeout_ms == 0 {
        errors.push(ValidationError::new("store.timeout_ms", "must be greater than 0"));
    }
    if config.store.purge_interval_secs == 0 {
        errors.push(ValidationError::new("store.purge_interval_secs", "must be greater than 0"));
    }

    for (i, cidr) in config.security.trusted_proxies.iter().enumerate() {
        if cidr.parse::<IpNet>().is_err() {
            errors.push(ValidationError::new(
                format!("security.trusted_proxies[{i}]"),
                format!("'{cidr}' is not a CIDR network"),
            ));
        }
    }

    if config.observability.prometheus_enabled {
        check_address(&mut errors, "observability.prometheus_address", &config.observability.prometheus_address);
    }

    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::new("admin.api_key", "must not be empty"));
        } else if config.mode == RunMode::Production && config.admin.api_key == PLACEHOLDER_API_KEY {
            errors.push(ValidationError::new("admin.api_key", "placeholder key is not allowed in production"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(field, format!("'{value}' is not a socket address")));
    }
}

fn validate_tokens(config: &DefenseConfig, errors: &mut Vec<ValidationError>) {
    let tokens = &config.tokens;
    if tokens.access_ttl_secs == 0 {
        errors.push(ValidationError::new("tokens.access_ttl_secs", "must be greater than 0"));
    }
    if tokens.refresh_ttl_secs <= tokens.access_ttl_secs {
        errors.push(ValidationError::new(
            "tokens.refresh_ttl_secs",
            "must be longer than tokens.access_ttl_secs",
        ));
    }
    if !tokens.refresh_path.starts_with('/') {
        errors.push(ValidationError::new("tokens.refresh_path", "must start with '/'"));
    }

    let mut ids = HashSet::new();
    for (i, entry) in tokens.secrets.iter().enumerate() {
        let field = format!("tokens.secrets[{i}]");
        if !ids.insert(entry.id.as_str()) {
            errors.push(ValidationError::new(&field, format!("duplicate secret id '{}'", entry.id)));
        }
        match entry.algorithm.parse::<SigningAlgorithm>() {
            Ok(alg) => {
                if let Err(e) = Secret::new(entry.id.clone(), entry.secret.as_bytes(), alg) {
                    errors.push(ValidationError::new(&field, e.to_string()));
                }
            }
            Err(e) => errors.push(ValidationError::new(&field, e.to_string())),
        }
    }
}

fn validate_tiers(config: &DefenseConfig, errors: &mut Vec<ValidationError>) {
    for (name, tier) in &config.rate_limit.tiers {
        if tier.window_secs == 0 {
            errors.push(ValidationError::new(
                format!("rate_limit.tiers.{name}.window_secs"),
                "must be greater than 0",
            ));
        }
        if tier.limit == 0 {
            errors.push(ValidationError::new(
                format!("rate_limit.tiers.{name}.limit"),
                "must be greater than 0",
            ));
        }
    }
    if let Some(tier) = &config.rate_limit.default_tier {
        check_tier(config, errors, "rate_limit.default_tier", tier);
    }
}

fn check_tier(config: &DefenseConfig, errors: &mut Vec<ValidationError>, field: &str, tier: &str) {
    if config.rate_limit.enabled && !config.rate_limit.tiers.contains_key(tier) {
        errors.push(ValidationError::new(field, format!("unknown rate limit tier '{tier}'")));
    }
}

fn validate_login(config: &DefenseConfig, errors: &mut Vec<ValidationError>) {
    let login = &config.login;
    if !login.path.starts_with('/') {
        errors.push(ValidationError::new("login.path", "must start with '/'"));
    }
    if login.path == config.tokens.refresh_path {
        errors.push(ValidationError::new("login.path", "must differ from tokens.refresh_path"));
    }
    if login.username_field.is_empty() {
        errors.push(ValidationError::new("login.username_field", "must not be empty"));
    }
    if let Some(tier) = &login.tier {
        check_tier(config, errors, "login.tier", tier);
    }
    if login.threshold == 0 {
        errors.push(ValidationError::new("login.threshold", "must be greater than 0"));
    }
    if login.observation_window_secs == 0 {
        errors.push(ValidationError::new("login.observation_window_secs", "must be greater than 0"));
    }
    if login.base_lockout_secs == 0 {
        errors.push(ValidationError::new("login.base_lockout_secs", "must be greater than 0"));
    }
    if login.backoff_multiplier == 0 {
        errors.push(ValidationError::new("login.backoff_multiplier", "must be at least 1"));
    }
    if login.max_lockout_secs < login.base_lockout_secs {
        errors.push(ValidationError::new(
            "login.max_lockout_secs",
            "must not be shorter than login.base_lockout_secs",
        ));
    }
}

fn validate_routes(config: &DefenseConfig, errors: &mut Vec<ValidationError>) {
    let mut names = HashSet::new();
    for (i, route) in config.routing.routes.iter().enumerate() {
        let field = format!("routing.routes[{i}]");
        if !names.insert(route.name.as_str()) {
            errors.push(ValidationError::new(&field, format!("duplicate route name '{}'", route.name)));
        }
        if !route.path_prefix.starts_with('/') {
            errors.push(ValidationError::new(format!("{field}.path_prefix"), "must start with '/'"));
        }
        if let Some(tier) = &route.tier {
            check_tier(config, errors, &format!("{field}.tier"), tier);
        }
        if route.max_field_length == Some(0) {
            errors.push(ValidationError::new(format!("{field}.max_field_length"), "must be greater than 0"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{RouteConfig, SecretEntry, TierConfig};

    fn route(name: &str, prefix: &str, tier: Option<&str>) -> RouteConfig {
        RouteConfig {
            name: name.into(),
            path_prefix: prefix.into(),
            tier: tier.map(String::from),
            authenticated: None,
            long_text_fields: Vec::new(),
            max_field_length: None,
            priority: 0,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&DefenseConfig::default()).is_ok());
    }

    #[test]
    fn test_unknown_tiers_are_reported() {
        let mut config = DefenseConfig::default();
        config.login.tier = Some("nope".into());
        config.routing.routes.push(route("api", "/api", Some("missing")));

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"login.tier"));
        assert!(fields.contains(&"routing.routes[0].tier"));
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = DefenseConfig::default();
        config.rate_limit.tiers.insert(
            "broken".into(),
            TierConfig { window_secs: 0, limit: 0, role_limits: Default::default() },
        );
        config.store.timeout_ms = 0;
        config.tokens.refresh_ttl_secs = 10;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
    }

    #[test]
    fn test_bad_secrets_rejected() {
        let mut config = DefenseConfig::default();
        config.tokens.secrets = vec![
            SecretEntry { id: "k1".into(), secret: "short".into(), algorithm: "HS256".into() },
            SecretEntry { id: "k2".into(), secret: "x".repeat(40), algorithm: "RS256".into() },
            SecretEntry { id: "k2".into(), secret: "y".repeat(40), algorithm: "HS512".into() },
        ];
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().all(|e| e.field.starts_with("tokens.secrets")));
    }

    #[test]
    fn test_trusted_proxies_must_parse() {
        let mut config = DefenseConfig::default();
        config.security.trusted_proxies = vec!["10.0.0.0/8".into(), "not-a-net".into()];
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "security.trusted_proxies[1]");
    }

    #[test]
    fn test_placeholder_admin_key_refused_in_production() {
        let mut config = DefenseConfig::default();
        config.admin.enabled = true;
        assert!(validate_config(&config).is_ok());

        config.mode = RunMode::Production;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "admin.api_key");
    }
}
