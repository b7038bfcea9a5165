use crate::store::{RecordingStore, DEFAULT_CLEANUP_MAX_AGE};
use std::sync::Arc;
use std::time::Duration;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Process-wide recording store
    pub store: Arc<RecordingStore>,

    /// Age used by `POST /recordings/cleanup` when the request names none
    pub cleanup_max_age: Duration,
}

impl AppState {
    pub fn new(store: Arc<RecordingStore>) -> Self {
        Self {
            store,
            cleanup_max_age: DEFAULT_CLEANUP_MAX_AGE,
        }
    }

    pub fn with_cleanup_max_age(mut self, max_age: Duration) -> Self {
        self.cleanup_max_age = max_age;
        self
    }
}
