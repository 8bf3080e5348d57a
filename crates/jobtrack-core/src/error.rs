//! Error types for jobtrack.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("trigger failed: {0}")]
    TriggerFailed(String),

    /// The engine accepted the trigger but its location reference did not
    /// end in a build number. The build exists and must be reconciled by hand.
    #[error("build started but its number could not be resolved from '{location}'")]
    BuildNumberUnresolved { location: String },

    #[error("invalid callback: {0}")]
    InvalidCallback(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("poll failed: {0}")]
    PollFailed(String),

    #[error("log fetch failed: {0}")]
    FetchFailed(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, Error>;
