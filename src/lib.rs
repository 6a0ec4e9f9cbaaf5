//! Request defense layer: token auth, rate limiting, login lockouts and
//! payload guarding in front of an HTTP service.

pub mod admin;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod routing;
pub mod security;

pub use config::schema::DefenseConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use security::Defense;
