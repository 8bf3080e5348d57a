//! External job engine adapters for jobtrack.
//!
//! Available gateways:
//! - Jenkins (remote build trigger + JSON API)

pub mod jenkins;

pub use jenkins::{GatewayError, JenkinsGateway};
