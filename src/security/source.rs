//! Startup-time secret acquisition.
//!
//! Secrets are resolved exactly once, before any listener is bound, by
//! walking a chain of [`SecretSource`]s chosen by [`RunMode`]. Production
//! refuses to start without an operator-provided secret; development falls
//! back to an ephemeral random one.

use std::str::FromStr;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::schema::SecretEntry;
use crate::error::SecretError;
use crate::security::secrets::{Secret, SigningAlgorithm};

/// Default environment variable holding the ordered secret list.
pub const SECRETS_ENV: &str = "DEFENSE_SECRETS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Development,
    Production,
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(RunMode::Development),
            "production" | "prod" => Ok(RunMode::Production),
            other => Err(format!("unknown run mode '{other}'")),
        }
    }
}

#[derive(Debug, Error)]
pub enum SecretSourceError {
    #[error("{source_name}: {error}")]
    Invalid {
        source_name: &'static str,
        error: SecretError,
    },
    #[error("no usable signing secret found (tried: {tried}); refusing to start")]
    NoUsableSecret { tried: String },
}

/// A strategy for obtaining the initial ordered secret list.
pub trait SecretSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// An empty list means "nothing configured here", not an error.
    fn load(&self) -> Result<Vec<Secret>, SecretError>;
}

/// Reads a comma-separated list from an environment variable.
#[derive(Debug, Clone)]
pub struct EnvSecretSource {
    var: String,
}

impl EnvSecretSource {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl SecretSource for EnvSecretSource {
    fn name(&self) -> &'static str {
        "environment"
    }

    fn load(&self) -> Result<Vec<Secret>, SecretError> {
        match std::env::var(&self.var) {
            Ok(raw) => parse_secret_list(&raw),
            Err(_) => Ok(Vec::new()),
        }
    }
}

/// Secrets listed in the configuration file.
#[derive(Debug, Clone)]
pub struct ConfigSecretSource {
    entries: Vec<SecretEntry>,
}

impl ConfigSecretSource {
    pub fn new(entries: Vec<SecretEntry>) -> Self {
        Self { entries }
    }
}

impl SecretSource for ConfigSecretSource {
    fn name(&self) -> &'static str {
        "config"
    }

    fn load(&self) -> Result<Vec<Secret>, SecretError> {
        self.entries
            .iter()
            .map(|e| {
                let alg = e.algorithm.parse::<SigningAlgorithm>()?;
                Secret::new(e.id.clone(), e.secret.clone().into_bytes(), alg)
            })
            .collect()
    }
}

/// Generates a random secret per process. Development only: tokens do not
/// survive a restart.
#[derive(Debug, Clone, Default)]
pub struct EphemeralSecretSource;

impl SecretSource for EphemeralSecretSource {
    fn name(&self) -> &'static str {
        "ephemeral"
    }

    fn load(&self) -> Result<Vec<Secret>, SecretError> {
        let material: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(64)
            .map(char::from)
            .collect();
        tracing::warn!("Using an ephemeral signing secret; tokens will not survive a restart");
        Ok(vec![Secret::new("ephemeral", material.into_bytes(), SigningAlgorithm::HS256)?])
    }
}

/// The source chain for a run mode.
pub fn sources_for(mode: RunMode, env_var: &str, configured: Vec<SecretEntry>) -> Vec<Box<dyn SecretSource>> {
    let mut chain: Vec<Box<dyn SecretSource>> = vec![
        Box::new(EnvSecretSource::new(env_var)),
        Box::new(ConfigSecretSource::new(configured)),
    ];
    if mode == RunMode::Development {
        chain.push(Box::new(EphemeralSecretSource));
    }
    chain
}

/// Walk `sources` in order and return the first non-empty secret list.
pub fn resolve_secrets(sources: &[Box<dyn SecretSource>]) -> Result<Vec<Secret>, SecretSourceError> {
    for source in sources {
        let secrets = source.load().map_err(|error| SecretSourceError::Invalid {
            source_name: source.name(),
            error,
        })?;
        if !secrets.is_empty() {
            tracing::info!(source = source.name(), count = secrets.len(), "Signing secrets loaded");
            return Ok(secrets);
        }
    }

    let tried = sources.iter().map(|s| s.name()).collect::<Vec<_>>().join(", ");
    Err(SecretSourceError::NoUsableSecret { tried })
}

/// Parse an ordered, comma-separated secret list. The first entry is the
/// active secret.
///
/// Each entry is either bare `material` (named `env-<position>`, HS256) or
/// `id:ALG:material`. Any entry containing `:` must use the full form, so
/// material is never silently split at a colon.
pub fn parse_secret_list(raw: &str) -> Result<Vec<Secret>, SecretError> {
    let secrets = raw
        .split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .enumerate()
        .map(|(i, entry)| parse_entry(i, entry))
        .collect::<Result<Vec<_>, _>>()?;

    if !secrets.is_empty() {
        let ids = secrets.iter().map(Secret::id).collect::<Vec<_>>().join(", ");
        tracing::info!(ids = %ids, "Parsed secret list");
    }
    Ok(secrets)
}

fn parse_entry(position: usize, entry: &str) -> Result<Secret, SecretError> {
    if !entry.contains(':') {
        return Secret::new(format!("env-{position}"), entry.as_bytes(), SigningAlgorithm::HS256);
    }

    match entry.splitn(3, ':').collect::<Vec<_>>().as_slice() {
        [id, alg, material] if is_secret_id(id) => Secret::new(*id, material.as_bytes(), alg.parse()?),
        _ => Err(SecretError::MalformedEntry { position }),
    }
}

fn is_secret_id(candidate: &str) -> bool {
    !candidate.is_empty()
        && candidate.len() <= 32
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
