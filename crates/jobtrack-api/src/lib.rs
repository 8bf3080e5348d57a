//! HTTP API server for jobtrack.
//!
//! Exposes the scan endpoints (trigger, status, log, callback, result) over
//! the build lifecycle tracker, plus unauthenticated health endpoints.

pub mod auth;
pub mod error;
pub mod routes;
pub mod state;

pub use state::AppState;

/// Version reported by `/` and `/health`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
