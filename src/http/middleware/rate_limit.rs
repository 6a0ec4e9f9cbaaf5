//! Tier quota enforcement.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::Rejection;
use crate::http::request::{client_ip, request_id};
use crate::http::server::AppState;
use crate::routing::RoutePolicy;
use crate::security::rate_limit::Caller;
use crate::security::token::Claims;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Authenticated callers are counted by subject, everyone else by address.
pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, Rejection> {
    let Some(tier) = request
        .extensions()
        .get::<Arc<RoutePolicy>>()
        .and_then(|p| p.tier.clone())
    else {
        return Ok(next.run(request).await);
    };

    let caller = match request.extensions().get::<Claims>() {
        Some(claims) => Caller::from_claims(claims),
        None => Caller::anonymous(client_ip(&request)),
    };

    let decision = state.defense.rate_limiter.check(&caller, &tier).await;
    let (limit, remaining) = decision.into_result().inspect_err(|e| {
        tracing::info!(request_id = %request_id(&request), tier = %tier, identity = ?caller.identity, reason = %e, "Request rate limited");
    })?;

    let mut response = next.run(request).await;
    if limit != u64::MAX {
        let headers = response.headers_mut();
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(remaining));
    }
    Ok(response)
}
