//! Build lifecycle tracking for jobtrack.
//!
//! Reconciles caller-driven status polls and engine callbacks into one
//! persisted record per build. There is no background loop: progress is only
//! observed when a caller polls.

pub mod tracker;

pub use tracker::{BuildLifecycleTracker, CallbackReceipt, StatusView};
