//! First pipeline stage: route policy, client address, payload guarding.

use std::sync::Arc;

use axum::body::{to_bytes, Body, Bytes};
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use serde_json::Value;

use crate::error::{PayloadError, Rejection};
use crate::http::request::{request_id, ClientIp, X_REQUEST_ID};
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::routing::RoutePolicy;
use crate::security::headers::{peer_ip, strip_identity_headers};

pub async fn request_guard(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, Rejection> {
    let defense = &state.defense;
    let policy = defense.routes.match_path(request.uri().path());
    let client = defense.trusted_proxies.client_ip(peer_ip(&request), request.headers());
    strip_identity_headers(request.headers_mut());

    let declared = declared_length(request.headers());
    if let Err(e) = defense.request_guard.check_body_size(declared) {
        tracing::warn!(
            request_id = %request_id(&request),
            route = %policy.name,
            client = %client,
            declared = ?declared,
            "Request body too large"
        );
        return Err(e.into());
    }

    let limit = defense.request_guard.max_body_bytes();
    let sanitize = !policy.long_text_fields.is_empty() && is_json(request.headers());
    if declared.is_none() || sanitize {
        let (mut parts, body) = request.into_parts();
        // Read failures other than the ceiling mean the client went away.
        let mut bytes = to_bytes(body, limit as usize)
            .await
            .map_err(|_| PayloadError::TooLarge { limit })?;

        if sanitize {
            bytes = sanitize_fields(&state, &policy, &parts.headers, bytes);
        }
        parts.headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
        request = Request::from_parts(parts, Body::from(bytes));
    }

    request.extensions_mut().insert(ClientIp(client));
    request.extensions_mut().insert(policy);
    Ok(next.run(request).await)
}

fn sanitize_fields(state: &AppState, policy: &Arc<RoutePolicy>, headers: &HeaderMap, bytes: Bytes) -> Bytes {
    let Ok(mut body) = serde_json::from_slice::<Value>(&bytes) else {
        return bytes;
    };

    let guard = &state.defense.request_guard;
    let max = policy.max_field_length.unwrap_or(guard.max_field_length());
    let report = guard.sanitize_long_fields(&mut body, &policy.long_text_fields, Some(max));
    if !report.any_truncated {
        return bytes;
    }

    let id = headers.get(&X_REQUEST_ID).and_then(|v| v.to_str().ok()).unwrap_or("-");
    let mut truncated = 0;
    for field in &report.fields {
        if let Some(audit) = field.truncation(max) {
            truncated += 1;
            tracing::warn!(request_id = %id, route = %policy.name, field = ?field, "{audit}");
        }
    }
    metrics::record_truncation(&policy.name, truncated);

    match serde_json::to_vec(&body) {
        Ok(rewritten) => Bytes::from(rewritten),
        Err(e) => {
            tracing::error!(request_id = %id, error = %e, "Failed to re-encode sanitized body");
            bytes
        }
    }
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| {
            let mime = v.split(';').next().unwrap_or_default().trim();
            mime.eq_ignore_ascii_case("application/json") || mime.ends_with("+json")
        })
}
