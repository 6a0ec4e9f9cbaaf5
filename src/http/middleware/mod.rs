//! Defense pipeline stages, applied as axum middleware.
//!
//! # Order
//! ```text
//! stats → guard → auth → rate_limit → login → handler
//! ```
//! Each stage reads what earlier stages put in the request extensions
//! (`Arc<RoutePolicy>`, `ClientIp`, `Claims`) and may short-circuit with a
//! [`Rejection`](crate::error::Rejection).

pub mod auth;
pub mod guard;
pub mod login;
pub mod rate_limit;
pub mod stats;
