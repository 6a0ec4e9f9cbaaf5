//! request-defense gateway
//!
//! Sits in front of an HTTP application and decides, per request, whether
//! it may proceed.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ request id ─▶ trace ─▶ timeout ─▶ stats/shedding
//!                                                      │
//!                 ┌────────────────────────────────────┘
//!                 ▼
//!           request guard ─▶ authenticate ─▶ rate limit ─▶ login guard ─▶ upstream
//!          (size, fields)    (bearer JWT)    (tier, role)  (lockouts)
//!
//!     /healthz, /metrics        answered locally
//!     /auth/refresh             token rotation
//!     admin listener            secrets, revocation, lockouts, status
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use request_defense::clock::SystemClock;
use request_defense::config::loader::{default_config, load_config, CONFIG_ENV};
use request_defense::config::validation::validate_config;
use request_defense::config::ConfigError;
use request_defense::lifecycle::bootstrap;
use request_defense::observability::logging::init_logging;
use request_defense::security::source::RunMode;

#[derive(Parser)]
#[command(name = "request-defense")]
#[command(about = "Authentication, rate limiting and abuse protection in front of an HTTP service", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults apply when omitted
    #[arg(short, long, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Overrides `mode` from the file (development | production)
    #[arg(short, long)]
    mode: Option<RunMode>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => default_config()?,
    };
    if let Some(mode) = cli.mode {
        config.mode = mode;
        validate_config(&config).map_err(ConfigError::Validation)?;
    }

    init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "request-defense starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        request_timeout_secs = config.timeouts.request_secs,
        config_file = ?cli.config,
        "Configuration loaded"
    );

    let gateway = bootstrap(config, Arc::new(SystemClock))?;
    gateway.run().await?;
    Ok(())
}
