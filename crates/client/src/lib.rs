// crates/client/src/lib.rs
//! Consumer side of the embedding progress API.
//!
//! [`track_progress`] follows one job through a three-tier fallback:
//!
//! 1. **Live stream** — an SSE connection to `/api/progress/{id}/stream`;
//! 2. **One-shot fetch** — a single `GET /api/progress/{id}` when the stream
//!    dies before any real progress arrived;
//! 3. **Polling** — periodic snapshot fetches when the stream could not be
//!    opened at all.
//!
//! The caller gets a [`TrackerHandle`] back immediately; cancelling it
//! guarantees that no further observer callbacks are delivered.

mod frame;
mod policy;
mod tracker;

pub use policy::{classify_stream_error, ErrorDisposition};

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use bookchat_types::BookId;

use tracker::{CallbackGate, TrackerSession};

/// Errors surfaced through [`ProgressObserver::on_error`].
///
/// Exactly one error is delivered per tracking session, and only for
/// failures the fallback chain could not absorb.
#[derive(Debug, Error)]
pub enum TrackError {
    #[error("authentication token not found")]
    MissingToken,

    #[error("progress stream failed: {0}")]
    Stream(String),

    #[error("progress fetch failed: {0}")]
    Fetch(String),
}

/// Receives progress callbacks for one tracked job.
///
/// Callbacks are invoked from the tracker task; implementations should hand
/// off quickly rather than block.
pub trait ProgressObserver: Send + Sync + 'static {
    /// Latest `(processedChunks, totalChunks, exactWordCount,
    /// exactTokenCount)` values. The final values may be delivered more than
    /// once; completion itself is signalled by [`on_complete`](Self::on_complete).
    fn on_progress(&self, processed: u64, total: u64, words: u64, tokens: u64);

    /// A failure the fallback chain could not absorb. At most one per session.
    fn on_error(&self, error: TrackError);

    /// The job finished. At most one per session.
    fn on_complete(&self) {}
}

/// Connection settings for the progress endpoints.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server origin, e.g. `http://127.0.0.1:4817`.
    pub base_url: String,
    /// Caller credential; `None` fails fast with [`TrackError::MissingToken`].
    pub token: Option<String>,
    /// Poll-tier fetch interval.
    pub poll_interval: Duration,
    /// Pause between the final progress refresh and `on_complete`, so the
    /// observer's UI can settle at 100%.
    pub completion_grace: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token,
            poll_interval: Duration::from_secs(3),
            completion_grace: Duration::from_secs(1),
        }
    }
}

/// Cancellation handle for one tracking session.
///
/// Idempotent and safe to invoke after natural completion (no-op).
#[derive(Clone)]
pub struct TrackerHandle {
    cancel: CancellationToken,
}

impl TrackerHandle {
    /// Stop the session: tears down the active connection or timer and
    /// guarantees no further observer callbacks.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Start tracking embedding progress for `book_id`.
///
/// Returns immediately; all I/O happens on a spawned task (requires a tokio
/// runtime). A missing token is reported through `on_error` before any
/// connection attempt, and the returned handle is inert.
pub fn track_progress(
    config: ClientConfig,
    book_id: BookId,
    observer: Arc<dyn ProgressObserver>,
) -> TrackerHandle {
    let cancel = CancellationToken::new();
    let gate = CallbackGate::new(cancel.clone(), observer);

    let Some(token) = config.token.clone() else {
        gate.error(TrackError::MissingToken);
        return TrackerHandle { cancel };
    };

    let session = TrackerSession::new(config, token, book_id, gate, cancel.clone());
    tokio::spawn(session.run());

    TrackerHandle { cancel }
}
