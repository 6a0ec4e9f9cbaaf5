//! Lockout enforcement and token issuance around the upstream login route.
//!
//! The upstream owns password checking. This stage reserves an attempt
//! slot before the credentials reach it (refusing locked or saturated
//! identifiers), turns the upstream verdict
//! into a success or failure, and answers a successful login with a token
//! pair minted from the identity the upstream returned.

use std::sync::Arc;

use axum::body::{to_bytes, Body, Bytes};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{LockoutError, PayloadError, Rejection};
use crate::http::request::{client_ip, request_id};
use crate::http::server::AppState;
use crate::routing::RoutePolicy;
use crate::security::login::{Attempt, LockStatus, LoginIdentifier};

/// Largest identity document accepted from the upstream.
const MAX_IDENTITY_BYTES: usize = 64 * 1024;

/// What the upstream returns for valid credentials.
#[derive(Debug, Deserialize)]
pub struct UpstreamIdentity {
    pub subject: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

pub async fn login_guard(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, Rejection> {
    let is_login = request
        .extensions()
        .get::<Arc<RoutePolicy>>()
        .is_some_and(|p| p.login);
    if !is_login {
        return Ok(next.run(request).await);
    }

    let defense = &state.defense;
    let req_id = request_id(&request).to_string();
    let client = client_ip(&request);

    let limit = defense.request_guard.max_body_bytes();
    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, limit as usize)
        .await
        .map_err(|_| PayloadError::TooLarge { limit })?;

    let username = username_of(&bytes, &defense.username_field);
    let id = LoginIdentifier::new(&username, client);
    let guard = &defense.login_guard;

    // The slot is taken before the credentials reach the upstream. Locked
    // identifiers are refused here and the lock grows.
    let permit = match guard.begin(&id).await? {
        Attempt::Proceed(permit) => permit,
        Attempt::Refused { retry_after } => {
            tracing::warn!(request_id = %req_id, identifier = %id, retry_after, "Login attempt refused");
            return Err(LockoutError::Locked { retry_after }.into());
        }
    };

    let response = next.run(Request::from_parts(parts, Body::from(bytes))).await;
    let status = response.status();

    if status.is_success() {
        permit.succeed().await?;
        return issue_tokens(&state, &req_id, response).await;
    }

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return match permit.fail().await? {
            LockStatus::Locked { retry_after } => Err(LockoutError::Locked { retry_after }.into()),
            LockStatus::Open { .. } => Err(Rejection::LoginFailed),
        };
    }

    permit.abandon().await?;
    Ok(response)
}

async fn issue_tokens(state: &AppState, req_id: &str, response: Response) -> Result<Response, Rejection> {
    let identity = match to_bytes(response.into_body(), MAX_IDENTITY_BYTES).await {
        Ok(bytes) => serde_json::from_slice::<UpstreamIdentity>(&bytes).ok(),
        Err(_) => None,
    };

    let Some(identity) = identity else {
        tracing::error!(request_id = %req_id, "Upstream accepted login without a usable identity");
        return Ok((StatusCode::BAD_GATEWAY, "Upstream returned no identity").into_response());
    };

    let pair = state
        .defense
        .tokens
        .issue(&identity.subject, identity.roles, identity.permissions)?;
    tracing::info!(request_id = %req_id, subject = %identity.subject, "Login succeeded, tokens issued");
    Ok(Json(pair).into_response())
}

/// The submitted username, or empty when the body carries none; the
/// identifier then still isolates by address.
fn username_of(body: &Bytes, field: &str) -> String {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| v.get(field).and_then(Value::as_str).map(str::to_owned))
        .unwrap_or_default()
}
