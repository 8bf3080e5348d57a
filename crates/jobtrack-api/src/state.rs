//! Application state.

use jobtrack_tracker::BuildLifecycleTracker;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<BuildLifecycleTracker>,
    /// The one bearer token accepted on `/api/scan`.
    pub api_key: Arc<str>,
}

impl AppState {
    pub fn new(tracker: Arc<BuildLifecycleTracker>, api_key: impl Into<Arc<str>>) -> Self {
        Self {
            tracker,
            api_key: api_key.into(),
        }
    }
}
