// crates/client/src/tracker.rs
//! The per-job tracking session: a single task that owns one active
//! transport at a time and walks an explicit state machine
//! `Connecting → Streaming → {Completed, FallbackFetch, FallbackPoll} → Closed`.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use bookchat_types::{BookId, ProgressSnapshot};

use crate::frame::{parse_snapshot, SseFrameDecoder};
use crate::policy::{classify_stream_error, ErrorDisposition};
use crate::{ClientConfig, ProgressObserver, TrackError};

/// Observer wrapper that enforces the cancellation guarantee: once the token
/// is cancelled, no callback is ever delivered again, even if in-flight I/O
/// completes afterwards.
pub(crate) struct CallbackGate {
    cancel: CancellationToken,
    observer: Arc<dyn ProgressObserver>,
}

impl CallbackGate {
    pub(crate) fn new(cancel: CancellationToken, observer: Arc<dyn ProgressObserver>) -> Self {
        Self { cancel, observer }
    }

    pub(crate) fn progress(&self, processed: u64, total: u64, words: u64, tokens: u64) {
        if !self.cancel.is_cancelled() {
            self.observer.on_progress(processed, total, words, tokens);
        }
    }

    pub(crate) fn error(&self, error: TrackError) {
        if !self.cancel.is_cancelled() {
            self.observer.on_error(error);
        }
    }

    pub(crate) fn complete(&self) {
        if !self.cancel.is_cancelled() {
            self.observer.on_complete();
        }
    }
}

/// Outcome of the streaming state, deciding the next transition.
enum StreamOutcome {
    /// Final snapshot observed and settle grace elapsed.
    Completed,
    /// The transport failed or ended without a completion snapshot.
    Failed(String),
    /// Cancelled by the caller.
    Cancelled,
}

pub(crate) struct TrackerSession {
    http: reqwest::Client,
    config: ClientConfig,
    token: String,
    book_id: BookId,
    gate: CallbackGate,
    cancel: CancellationToken,
    /// Last snapshot seen on the stream, reused during fallback decisions.
    last: ProgressSnapshot,
    /// True once a snapshot with a known total arrived.
    primed: bool,
    /// True once we initiated (or are about to initiate) the close.
    expecting_close: bool,
}

impl TrackerSession {
    pub(crate) fn new(
        config: ClientConfig,
        token: String,
        book_id: BookId,
        gate: CallbackGate,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            token,
            book_id,
            gate,
            cancel,
            last: ProgressSnapshot::zero(book_id),
            primed: false,
            expecting_close: false,
        }
    }

    pub(crate) async fn run(mut self) {
        match self.open_stream().await {
            Ok(response) => match self.stream(response).await {
                StreamOutcome::Completed | StreamOutcome::Cancelled => {}
                StreamOutcome::Failed(reason) => self.handle_stream_failure(reason).await,
            },
            Err(e) => {
                // The stream could not be constructed at all. Not an error
                // from the caller's point of view: degrade to polling.
                tracing::warn!(
                    book_id = self.book_id,
                    error = %e,
                    "progress stream unavailable, falling back to polling"
                );
                self.poll().await;
            }
        }
    }

    // -- Connecting -----------------------------------------------------------

    /// The `EventSource` this replaces cannot set headers, so the stream
    /// endpoint takes the credential as a query parameter.
    async fn open_stream(&self) -> Result<reqwest::Response, reqwest::Error> {
        let url = format!(
            "{}/api/progress/{}/stream?token={}",
            self.config.base_url,
            self.book_id,
            urlencoding::encode(&self.token)
        );
        self.http.get(&url).send().await?.error_for_status()
    }

    // -- Streaming ------------------------------------------------------------

    async fn stream(&mut self, response: reqwest::Response) -> StreamOutcome {
        let mut decoder = SseFrameDecoder::new();
        let mut body = response.bytes_stream();

        loop {
            let chunk = tokio::select! {
                _ = self.cancel.cancelled() => return StreamOutcome::Cancelled,
                chunk = body.next() => chunk,
            };

            match chunk {
                Some(Ok(bytes)) => {
                    for payload in decoder.push(&bytes) {
                        let Some(snapshot) = parse_snapshot(&payload) else {
                            continue; // logged and dropped, never fatal
                        };
                        if self.handle_snapshot(snapshot).await {
                            return if self.cancel.is_cancelled() {
                                StreamOutcome::Cancelled
                            } else {
                                StreamOutcome::Completed
                            };
                        }
                    }
                }
                Some(Err(e)) => return StreamOutcome::Failed(e.to_string()),
                // Ending without a completion snapshot is a transport
                // failure as far as the decision table is concerned.
                None => return StreamOutcome::Failed("stream closed by server".to_string()),
            }
        }
    }

    /// Deliver one structurally valid snapshot. Returns true when the
    /// session is over (completion observed, or cancelled mid-grace).
    async fn handle_snapshot(&mut self, snapshot: ProgressSnapshot) -> bool {
        self.last = snapshot;
        if snapshot.total_chunks > 0 {
            self.primed = true;
        }

        self.gate.progress(
            snapshot.processed_chunks,
            snapshot.total_chunks,
            snapshot.exact_word_count,
            snapshot.exact_token_count,
        );

        if !snapshot.is_complete() {
            return false;
        }

        // Completion snapshot: refresh the final values once more so the
        // observer is guaranteed to hold them, then close on our own terms.
        self.expecting_close = true;
        self.gate.progress(
            snapshot.processed_chunks,
            snapshot.total_chunks,
            snapshot.exact_word_count,
            snapshot.exact_token_count,
        );

        // Give the observer's UI a moment at 100% before the close.
        tokio::select! {
            _ = self.cancel.cancelled() => return true,
            _ = tokio::time::sleep(self.config.completion_grace) => {}
        }
        self.gate.complete();
        true
    }

    // -- Mid-stream failure ---------------------------------------------------

    async fn handle_stream_failure(&mut self, reason: String) {
        match classify_stream_error(self.primed, self.expecting_close, &self.last) {
            ErrorDisposition::Ignore => {
                tracing::debug!(book_id = self.book_id, reason, "ignoring stream error");
            }
            ErrorDisposition::SilentComplete => {
                tracing::debug!(
                    book_id = self.book_id,
                    reason,
                    processed = self.last.processed_chunks,
                    total = self.last.total_chunks,
                    "stream failed near completion, treating as complete"
                );
                self.expecting_close = true;
                self.gate.progress(
                    self.last.total_chunks,
                    self.last.total_chunks,
                    self.last.exact_word_count,
                    self.last.exact_token_count,
                );
                self.gate.complete();
            }
            ErrorDisposition::FetchOnce => match self.fetch_snapshot().await {
                Ok(snapshot) => {
                    self.gate.progress(
                        snapshot.processed_chunks,
                        snapshot.total_chunks,
                        snapshot.exact_word_count,
                        snapshot.exact_token_count,
                    );
                    if snapshot.is_complete() {
                        self.gate.complete();
                    }
                }
                Err(fetch_err) => {
                    tracing::warn!(book_id = self.book_id, reason, "stream and fallback fetch both failed");
                    self.gate.error(fetch_err);
                }
            },
            ErrorDisposition::Surface => {
                self.gate.error(TrackError::Stream(reason));
            }
        }
    }

    // -- Fallback fetch / polling --------------------------------------------

    async fn fetch_snapshot(&self) -> Result<ProgressSnapshot, TrackError> {
        let url = format!("{}/api/progress/{}", self.config.base_url, self.book_id);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| TrackError::Fetch(e.to_string()))?;
        response
            .json::<ProgressSnapshot>()
            .await
            .map_err(|e| TrackError::Fetch(e.to_string()))
    }

    /// Poll tier: entered only when the stream could not be constructed.
    async fn poll(&mut self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            let snapshot = match self.fetch_snapshot().await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    // Transient poll misses are expected; keep trying.
                    tracing::warn!(book_id = self.book_id, error = %e, "progress poll failed");
                    continue;
                }
            };

            self.last = snapshot;
            if snapshot.total_chunks > 0 {
                self.primed = true;
            }
            self.gate.progress(
                snapshot.processed_chunks,
                snapshot.total_chunks,
                snapshot.exact_word_count,
                snapshot.exact_token_count,
            );

            if snapshot.is_complete() {
                // Normalized final update: processed forced to total.
                self.gate.progress(
                    snapshot.total_chunks,
                    snapshot.total_chunks,
                    snapshot.exact_word_count,
                    snapshot.exact_token_count,
                );
                self.gate.complete();
                return;
            }
        }
    }
}
