// crates/client/src/frame.rs
//! Incremental decoding of `text/event-stream` frames into progress
//! snapshots.
//!
//! The decoder is transport-agnostic: it is fed raw body chunks and yields
//! the `data:` payload of each complete event. Keep-alive comments and
//! non-`data` fields are ignored, and a frame may arrive split across any
//! number of chunks.

use bookchat_types::ProgressSnapshot;

/// Accumulates body chunks and yields complete event payloads.
pub struct SseFrameDecoder {
    buf: String,
}

impl SseFrameDecoder {
    pub fn new() -> Self {
        Self { buf: String::new() }
    }

    /// Feed one body chunk; returns the `data:` payloads of every event
    /// completed by it, in arrival order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.push_str(&String::from_utf8_lossy(chunk));

        let mut payloads = Vec::new();
        while let Some(end) = self.buf.find("\n\n") {
            let event: String = self.buf.drain(..end + 2).collect();
            if let Some(payload) = data_payload(&event) {
                payloads.push(payload);
            }
        }
        payloads
    }
}

impl Default for SseFrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Join the `data:` lines of one event block; `None` when the event carries
/// no data (comments, `event:`/`id:`/`retry:` only).
fn data_payload(event: &str) -> Option<String> {
    let mut lines = Vec::new();
    for line in event.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if let Some(rest) = line.strip_prefix("data:") {
            lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

/// Parse one payload as a progress snapshot.
///
/// Frames missing `processedChunks`/`totalChunks`, or that are not JSON at
/// all, are logged and dropped — a malformed frame must never take the
/// consumer down.
pub fn parse_snapshot(payload: &str) -> Option<ProgressSnapshot> {
    match serde_json::from_str::<ProgressSnapshot>(payload) {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            tracing::warn!(error = %e, payload, "dropping malformed progress frame");
            None
        }
    }
}
