//! Startup orchestration.
//!
//! # Responsibilities
//! - Resolve signing secrets (fail fast in production)
//! - Initialize the defense layer in dependency order
//! - Start background tasks (store purge, metrics exporter, admin API)
//! - Bind listeners and begin accepting traffic
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::admin::{setup_admin_router, AdminState};
use crate::clock::SharedClock;
use crate::config::schema::DefenseConfig;
use crate::config::ConfigError;
use crate::http::{AppState, HttpServer, Upstream};
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::spawn_signal_listener;
use crate::observability::metrics::{self, RequestStats};
use crate::security::source::{resolve_secrets, sources_for, SecretSourceError};
use crate::security::{Defense, DefenseError};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Secrets(#[from] SecretSourceError),
    #[error(transparent)]
    Defense(#[from] DefenseError),
    #[error("upstream address: {0}")]
    Upstream(#[from] axum::http::uri::InvalidUri),
    #[error("listener: {0}")]
    Io(#[from] std::io::Error),
    #[error("metrics exporter: {0}")]
    Metrics(String),
}

/// A fully wired gateway, ready to bind.
pub struct Gateway {
    config: DefenseConfig,
    defense: Arc<Defense>,
    stats: Arc<RequestStats>,
    shutdown: Shutdown,
}

/// Resolve secrets and build every defense component.
pub fn bootstrap(config: DefenseConfig, clock: SharedClock) -> Result<Gateway, StartupError> {
    let sources = sources_for(config.mode, &config.tokens.secrets_env, config.tokens.secrets.clone());
    let secrets = resolve_secrets(&sources)?;

    let defense = Arc::new(Defense::from_config(&config, secrets, clock)?);
    tracing::info!(
        mode = ?config.mode,
        active_secret = %defense.tokens.ring().active_id(),
        tiers = config.rate_limit.tiers.len(),
        routes = config.routing.routes.len(),
        "Defense layer initialized"
    );

    Ok(Gateway {
        config,
        defense,
        stats: Arc::new(RequestStats::new()),
        shutdown: Shutdown::new(),
    })
}

impl Gateway {
    pub fn defense(&self) -> &Arc<Defense> {
        &self.defense
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    pub fn app_state(&self) -> Result<AppState, StartupError> {
        Ok(AppState::new(
            self.defense.clone(),
            Upstream::from_config(&self.config.upstream)?,
            self.stats.clone(),
            self.config.listener.max_connections,
        ))
    }

    /// Bind listeners and serve until a shutdown signal.
    pub async fn run(self) -> Result<(), StartupError> {
        let config = &self.config;

        if config.observability.prometheus_enabled {
            let addr: SocketAddr = config
                .observability
                .prometheus_address
                .parse()
                .map_err(|e: std::net::AddrParseError| StartupError::Metrics(e.to_string()))?;
            metrics::init_prometheus(addr).map_err(|e| StartupError::Metrics(e.to_string()))?;
        }

        let server = HttpServer::new(config, self.app_state()?);
        let listener = TcpListener::bind(&config.listener.bind_address).await?;
        tracing::info!(address = %listener.local_addr()?, upstream = %config.upstream.address, "Listening for connections");

        if config.admin.enabled {
            let admin = setup_admin_router(AdminState {
                defense: self.defense.clone(),
                stats: self.stats.clone(),
                api_key: Arc::from(config.admin.api_key.as_str()),
                mode: config.mode,
            });
            let admin_listener = TcpListener::bind(&config.admin.bind_address).await?;
            tracing::info!(address = %admin_listener.local_addr()?, "Admin API listening");

            let mut stop = self.shutdown.subscribe();
            tokio::spawn(async move {
                let served = axum::serve(admin_listener, admin)
                    .with_graceful_shutdown(async move {
                        let _ = stop.recv().await;
                    })
                    .await;
                if let Err(e) = served {
                    tracing::error!(error = %e, "Admin API stopped with error");
                }
            });
        }

        spawn_purge_task(
            self.defense.clone(),
            Duration::from_secs(config.store.purge_interval_secs),
            self.shutdown.subscribe(),
        );
        spawn_signal_listener(&self.shutdown);

        server.run(listener, self.shutdown.subscribe()).await?;
        self.shutdown.trigger();
        tracing::info!("Shutdown complete");
        Ok(())
    }
}

/// Periodically drop counter entries that can no longer affect a decision.
pub fn spawn_purge_task(defense: Arc<Defense>, every: Duration, mut stop: broadcast::Receiver<()>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = defense.purge_expired();
                    tracing::debug!(removed, remaining = defense.store.len(), "Counter store purged");
                }
                _ = stop.recv() => break,
            }
        }
    });
}
