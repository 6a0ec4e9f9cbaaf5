//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request path
//!     → router.rs (policy lookup)
//!     → matcher.rs (evaluate match conditions)
//!     → Return: matched RoutePolicy or the default policy
//!
//! Route Compilation (at startup):
//!     RouteConfig[] + login/refresh paths
//!     → Sort by priority, then specificity
//!     → Freeze as immutable PolicyRouter
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same route
//! - First match wins

pub mod matcher;
pub mod router;

pub use router::{PolicyRouter, RoutePolicy};
