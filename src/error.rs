//! Error taxonomy of the defense layer.
//!
//! Component errors are plain `thiserror` enums. [`Rejection`] is what the
//! request pipeline turns them into: every variant is terminal for the
//! request and maps to a machine-readable reason code.

use std::time::Duration;

use axum::http::StatusCode;
use thiserror::Error;

/// Token verification and issuance failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing bearer credentials")]
    Missing,
    #[error("token has expired")]
    Expired,
    #[error("token signature is invalid")]
    BadSignature,
    #[error("token kind is not accepted here")]
    WrongKind,
    #[error("token is malformed")]
    Malformed,
    #[error("token has been revoked")]
    Revoked,
    #[error("refresh token is invalid")]
    InvalidRefreshToken,
    #[error("token signing failed: {0}")]
    Signing(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitError {
    #[error("rate limit exceeded, retry after {retry_after}s")]
    Exceeded { retry_after: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockoutError {
    #[error("too many failed attempts, retry after {retry_after}s")]
    Locked { retry_after: u64 },
}

/// Payload inspection outcomes. `FieldTruncated` is informational only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("request body exceeds {limit} bytes")]
    TooLarge { limit: u64 },
    #[error("field '{field}' truncated from {original_length} to {truncated_length} characters")]
    FieldTruncated {
        field: String,
        original_length: usize,
        truncated_length: usize,
    },
}

/// Counter store failures. Callers treat both variants as deny.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("counter store did not answer within {0:?}")]
    Timeout(Duration),
    #[error("counter store failure: {0}")]
    Backend(String),
}

/// Secret ring mutations and secret material problems.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecretError {
    #[error("secret ring must contain at least one secret")]
    Empty,
    #[error("unknown secret '{0}'")]
    UnknownSecret(String),
    #[error("secret '{0}' is active and cannot be retired")]
    RetireActive(String),
    #[error("secret id '{0}' is already in use")]
    DuplicateId(String),
    #[error("secret '{id}' is {len} bytes, at least {min} required")]
    WeakMaterial { id: String, len: usize, min: usize },
    #[error("unsupported signing algorithm '{0}'")]
    UnsupportedAlgorithm(String),
    #[error("secret entry {position} contains ':' but is not in 'id:ALG:material' form")]
    MalformedEntry { position: usize },
}

/// Machine-readable reason codes carried by every rejection response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReasonCode {
    RateLimited,
    Locked,
    TokenExpired,
    TokenInvalid,
    BodyTooLarge,
    LoginFailed,
    Unavailable,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::RateLimited => "RATE_LIMITED",
            ReasonCode::Locked => "LOCKED",
            ReasonCode::TokenExpired => "TOKEN_EXPIRED",
            ReasonCode::TokenInvalid => "TOKEN_INVALID",
            ReasonCode::BodyTooLarge => "BODY_TOO_LARGE",
            ReasonCode::LoginFailed => "LOGIN_FAILED",
            ReasonCode::Unavailable => "UNAVAILABLE",
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A terminal pipeline decision.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    RateLimited(#[from] RateLimitError),
    #[error(transparent)]
    Locked(#[from] LockoutError),
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error("credentials rejected")]
    LoginFailed,
    #[error(transparent)]
    Unavailable(#[from] StoreError),
}

impl Rejection {
    pub fn code(&self) -> ReasonCode {
        match self {
            Rejection::Auth(AuthError::Expired) => ReasonCode::TokenExpired,
            Rejection::Auth(_) => ReasonCode::TokenInvalid,
            Rejection::RateLimited(_) => ReasonCode::RateLimited,
            Rejection::Locked(_) => ReasonCode::Locked,
            Rejection::Payload(_) => ReasonCode::BodyTooLarge,
            Rejection::LoginFailed => ReasonCode::LoginFailed,
            Rejection::Unavailable(_) => ReasonCode::Unavailable,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::Auth(AuthError::Signing(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Rejection::Auth(_) | Rejection::LoginFailed => StatusCode::UNAUTHORIZED,
            Rejection::RateLimited(_) | Rejection::Locked(_) => StatusCode::TOO_MANY_REQUESTS,
            Rejection::Payload(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Rejection::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Rejection::RateLimited(RateLimitError::Exceeded { retry_after })
            | Rejection::Locked(LockoutError::Locked { retry_after }) => Some(*retry_after),
            Rejection::Unavailable(_) => Some(1),
            _ => None,
        }
    }

    /// Client-facing message. Deliberately generic for anything touching
    /// credentials so responses never reveal whether an account exists.
    pub fn public_message(&self) -> &'static str {
        match self {
            Rejection::Auth(AuthError::Expired) => "Token has expired",
            Rejection::Auth(AuthError::Signing(_)) => "Internal error",
            Rejection::Auth(_) => "Invalid or missing credentials",
            Rejection::LoginFailed => "Invalid username or password",
            Rejection::RateLimited(_) => "Too many requests",
            Rejection::Locked(_) => "Too many failed attempts",
            Rejection::Payload(_) => "Request body too large",
            Rejection::Unavailable(_) => "Service temporarily unavailable",
        }
    }
}
