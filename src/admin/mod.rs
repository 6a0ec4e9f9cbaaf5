//! Operator API: secret rotation, revocation, lockout clearing, status.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use crate::observability::metrics::RequestStats;
use crate::security::source::RunMode;
use crate::security::Defense;
use self::auth::admin_auth_middleware;
use self::handlers::*;

#[derive(Clone)]
pub struct AdminState {
    pub defense: Arc<Defense>,
    pub stats: Arc<RequestStats>,
    pub api_key: Arc<str>,
    pub mode: RunMode,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/metrics", get(get_metrics))
        .route("/admin/secrets", get(list_secrets))
        .route("/admin/secrets/rotate", post(rotate_secret))
        .route("/admin/secrets/{id}/retire", post(retire_secret))
        .route("/admin/subjects/{subject}/revoke", post(revoke_subject))
        .route("/admin/lockouts/{identifier}", delete(clear_lockout))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
