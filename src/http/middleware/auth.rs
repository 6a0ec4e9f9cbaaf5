//! Bearer token verification for authenticated routes.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::{AuthError, Rejection};
use crate::http::request::{bearer_token, client_ip, request_id};
use crate::http::server::AppState;
use crate::routing::RoutePolicy;
use crate::security::headers::insert_identity_headers;

/// Verifies the access token and attaches its [`Claims`](crate::security::token::Claims)
/// to the request extensions and the forwarded headers. Requests without a
/// resolved policy are treated as authenticated routes.
pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, Rejection> {
    let required = request
        .extensions()
        .get::<Arc<RoutePolicy>>()
        .map_or(true, |p| p.authenticated);
    if !required {
        return Ok(next.run(request).await);
    }

    let verified = bearer_token(request.headers())
        .ok_or(AuthError::Missing)
        .and_then(|token| state.defense.tokens.verify_access(token));

    let claims = match verified {
        Ok(claims) => claims,
        Err(e) => {
            tracing::warn!(
                request_id = %request_id(&request),
                client = %client_ip(&request),
                path = %request.uri().path(),
                reason = %e,
                "Authentication failed"
            );
            return Err(e.into());
        }
    };

    tracing::debug!(request_id = %request_id(&request), subject = %claims.sub, "Authenticated");
    insert_identity_headers(request.headers_mut(), &claims);
    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}
