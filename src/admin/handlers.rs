use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::admin::AdminState;
use crate::error::{SecretError, StoreError};
use crate::observability::metrics::{self, StatsSnapshot};
use crate::security::login::LoginIdentifier;
use crate::security::secrets::{Secret, SecretInfo, SigningAlgorithm};
use crate::security::source::RunMode;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error(transparent)]
    Secret(#[from] SecretError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match &self {
            AdminError::Secret(SecretError::UnknownSecret(_)) => StatusCode::NOT_FOUND,
            AdminError::Secret(SecretError::RetireActive(_) | SecretError::DuplicateId(_)) => StatusCode::CONFLICT,
            AdminError::Secret(_) => StatusCode::BAD_REQUEST,
            AdminError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub mode: RunMode,
    pub active_secret: String,
    pub counter_entries: usize,
    pub uptime_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct RotateRequest {
    pub id: String,
    pub secret: String,
    #[serde(default)]
    pub algorithm: Option<String>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        mode: state.mode,
        active_secret: state.defense.tokens.ring().active_id(),
        counter_entries: state.defense.store.len(),
        uptime_secs: state.stats.snapshot().uptime_secs,
    })
}

pub async fn get_metrics(State(state): State<AdminState>) -> Json<StatsSnapshot> {
    Json(state.stats.snapshot())
}

pub async fn list_secrets(State(state): State<AdminState>) -> Json<Vec<SecretInfo>> {
    Json(state.defense.tokens.secrets())
}

pub async fn rotate_secret(
    State(state): State<AdminState>,
    Json(body): Json<RotateRequest>,
) -> Result<(StatusCode, Json<Vec<SecretInfo>>), AdminError> {
    let algorithm = match body.algorithm.as_deref() {
        Some(alg) => alg.parse::<SigningAlgorithm>()?,
        None => SigningAlgorithm::default(),
    };
    let secret = Secret::new(body.id.clone(), body.secret.into_bytes(), algorithm)?;
    state.defense.tokens.rotate(secret)?;

    metrics::record_secret_event("rotate");
    tracing::info!(secret_id = %body.id, algorithm = algorithm.as_str(), "Signing secret rotated");
    Ok((StatusCode::CREATED, Json(state.defense.tokens.secrets())))
}

pub async fn retire_secret(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<SecretInfo>>, AdminError> {
    state.defense.tokens.retire(&id)?;

    metrics::record_secret_event("retire");
    tracing::info!(secret_id = %id, "Signing secret retired");
    Ok(Json(state.defense.tokens.secrets()))
}

pub async fn revoke_subject(State(state): State<AdminState>, Path(subject): Path<String>) -> StatusCode {
    state.defense.tokens.revoke(&subject);
    StatusCode::NO_CONTENT
}

/// `identifier` is the composed `username|address` key.
pub async fn clear_lockout(
    State(state): State<AdminState>,
    Path(identifier): Path<String>,
) -> Result<Json<serde_json::Value>, AdminError> {
    let id = LoginIdentifier::from_raw(identifier);
    let cleared = state.defense.login_guard.clear(&id).await?;
    tracing::info!(identifier = %id, cleared, "Lockout cleared by operator");
    Ok(Json(json!({ "identifier": id.as_str(), "cleared": cleared })))
}
