use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::admin::AdminState;
use crate::http::request::bearer_token;

pub async fn admin_auth_middleware(
    State(state): State<AdminState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    match bearer_token(request.headers()) {
        Some(key) if key_matches(key, &state.api_key) => Ok(next.run(request).await),
        _ => {
            tracing::warn!(path = %request.uri().path(), "Admin request with invalid API key");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

fn key_matches(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}
