//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::DefenseConfig;
use crate::config::validation::{validate_config, ValidationError};
use crate::security::source::RunMode;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "DEFENSE_CONFIG";
/// Environment variable overriding `mode`.
pub const MODE_ENV: &str = "DEFENSE_MODE";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid {MODE_ENV}: {0}")]
    Mode(String),
    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<DefenseConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse, apply environment overrides, validate.
pub fn parse_config(content: &str) -> Result<DefenseConfig, ConfigError> {
    let mut config: DefenseConfig = toml::from_str(content)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Defaults, with environment overrides, when no file is given.
pub fn default_config() -> Result<DefenseConfig, ConfigError> {
    let mut config = DefenseConfig::default();
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Overlay environment settings. `lookup` is injectable for tests.
pub fn apply_env_overrides<F>(config: &mut DefenseConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(mode) = lookup(MODE_ENV) {
        config.mode = mode.parse::<RunMode>().map_err(ConfigError::Mode)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_override() {
        let mut config = DefenseConfig::default();
        apply_env_overrides(&mut config, |k| (k == MODE_ENV).then(|| "prod".to_string())).unwrap();
        assert_eq!(config.mode, RunMode::Production);

        let err = apply_env_overrides(&mut config, |_| Some("staging".to_string())).unwrap_err();
        assert!(matches!(err, ConfigError::Mode(_)));
    }

    #[test]
    fn test_validation_errors_are_joined() {
        let err = parse_config("[store]\ntimeout_ms = 0\n[payload]\nmax_body_bytes = 0\n").unwrap_err();
        let text = err.to_string();
        assert!(text.starts_with("Validation failed: "));
        assert!(text.contains("store.timeout_ms"));
        assert!(text.contains("payload.max_body_bytes"));
    }

    #[test]
    fn test_syntax_error_is_parse_error() {
        assert!(matches!(parse_config("[store\n"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_config(Path::new("/nonexistent/defense.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
