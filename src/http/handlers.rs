//! Endpoints served by the gateway itself.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{AuthError, Rejection};
use crate::http::server::AppState;
use crate::observability::metrics::StatsSnapshot;
use crate::security::token::TokenPair;

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// `POST {refresh_path}`: exchange a refresh token for a new pair.
pub async fn refresh(
    State(state): State<AppState>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<TokenPair>, Rejection> {
    let Json(body) = payload.map_err(|e| {
        tracing::debug!(error = %e, "Unreadable refresh request");
        AuthError::InvalidRefreshToken
    })?;

    let pair = state.defense.tokens.refresh(&body.refresh_token).inspect_err(|e| {
        tracing::warn!(reason = %e, "Refresh rejected");
    })?;
    Ok(Json(pair))
}

/// `GET /metrics`
pub async fn metrics(State(state): State<AppState>) -> Json<StatsSnapshot> {
    Json(state.stats.snapshot())
}

/// `GET /healthz`
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
