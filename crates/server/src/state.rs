// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use bookchat_progress::ProgressBroadcaster;

/// Shared application state accessible from all route handlers.
///
/// The broadcaster is also handed to the embedding pipeline, which drives it
/// in-process via [`ProgressBroadcaster::advance`].
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Progress store + pub/sub hub shared with the embedding pipeline.
    pub broadcaster: Arc<ProgressBroadcaster>,
}

impl AppState {
    /// Create a new application state wrapped in an Arc for sharing.
    pub fn new() -> Arc<Self> {
        Self::with_broadcaster(Arc::new(ProgressBroadcaster::new()))
    }

    /// Create with an externally-owned broadcaster (the caller keeps a handle
    /// for the pipeline side, or for tests that publish directly).
    pub fn with_broadcaster(broadcaster: Arc<ProgressBroadcaster>) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            broadcaster,
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_starts_fresh() {
        let state = AppState::new();
        assert!(state.uptime_secs() < 1);
        assert_eq!(state.broadcaster.subscriber_count(1), 0);
    }

    #[test]
    fn with_broadcaster_shares_the_hub() {
        let hub = Arc::new(ProgressBroadcaster::new());
        let state = AppState::with_broadcaster(Arc::clone(&hub));
        hub.advance(7, 2, 4, 0, 0);
        assert_eq!(state.broadcaster.snapshot(7).processed_chunks, 2);
    }
}
