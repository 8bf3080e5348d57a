//! Core domain types and traits for jobtrack.
//!
//! This crate contains:
//! - Build identity and lifecycle status
//! - The persisted build record and its forward-only merge rule
//! - The execution gateway trait over the external job engine
//! - Console log helpers

pub mod build;
pub mod error;
pub mod gateway;
pub mod logs;

pub use build::{BuildKey, BuildRecord, BuildStatus, MergeOutcome};
pub use error::{Error, Result};
pub use gateway::{ExecutionGateway, StatusSnapshot, TriggeredBuild};
