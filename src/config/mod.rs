//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) or defaults
//!     → loader.rs (parse, deserialize, environment overrides)
//!     → validation.rs (semantic checks)
//!     → DefenseConfig (validated, immutable)
//!     → consumed once by lifecycle::startup to build the defense layer
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Secrets are not read here; `security::source` resolves them at startup

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::DefenseConfig;
pub use schema::ListenerConfig;
pub use schema::RouteConfig;
pub use schema::TierConfig;
