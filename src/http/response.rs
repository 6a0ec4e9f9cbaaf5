//! Rejection responses.
//!
//! # Responsibilities
//! - Render every [`Rejection`] as a JSON error with its reason code
//! - Add `Retry-After` where the rejection carries one
//! - Tag the response so request statistics can count rejections
//!
//! # Design Decisions
//! - Messages are generic; the reason code is the machine-readable part
//! - Body shape: `{"error": {"code", "message", "retry_after"?}}`

use axum::http::header::RETRY_AFTER;
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::{ReasonCode, Rejection};

/// Response extension naming the rejection that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RejectedWith(pub ReasonCode);

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let code = self.code();
        let retry_after = self.retry_after();

        if let Rejection::Auth(crate::error::AuthError::Signing(reason)) = &self {
            tracing::error!(reason = %reason, "Token signing failed");
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.as_str(),
                message: self.public_message(),
                retry_after,
            },
        };

        let mut response = (self.status(), Json(body)).into_response();
        if let Some(secs) = retry_after {
            response.headers_mut().insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response.extensions_mut().insert(RejectedWith(code));
        response
    }
}
