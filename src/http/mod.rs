//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing, timeout)
//!     → middleware/ (stats → guard → auth → rate_limit → login)
//!     → handlers.rs (refresh, metrics, health) or upstream forwarding
//!     → response.rs (rejections rendered with reason codes)
//!     → Send to client
//! ```

pub mod handlers;
pub mod middleware;
pub mod request;
pub mod response;
pub mod server;

pub use request::{ClientIp, UuidRequestId, X_REQUEST_ID};
pub use response::RejectedWith;
pub use server::{build_router, AppState, HttpServer, Upstream};
