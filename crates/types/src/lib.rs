// crates/types/src/lib.rs
//! Shared value types for the bookchat progress subsystem.
//!
//! The wire format uses camelCase field names (`processedChunks`,
//! `totalChunks`, ...) because that is what the HTTP API and the web client
//! exchange. Both the SSE frames and the snapshot fetch endpoint carry the
//! same shape.

use serde::{Deserialize, Serialize};

/// Identifier of one embedding-generation run (one book).
pub type BookId = u64;

/// Latest known progress of an embedding job.
///
/// Immutable value type. `processed_chunks` and the exact counts are
/// monotonically non-decreasing over a job's lifetime; `total_chunks == 0`
/// means "not yet known". A job is complete once `total_chunks > 0` and
/// `processed_chunks == total_chunks`, and completion is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    #[serde(default)]
    pub book_id: BookId,
    pub processed_chunks: u64,
    pub total_chunks: u64,
    #[serde(default)]
    pub exact_word_count: u64,
    #[serde(default)]
    pub exact_token_count: u64,
}

impl ProgressSnapshot {
    /// The "nothing known yet" snapshot sent to subscribers of a job that
    /// has not published anything.
    pub fn zero(book_id: BookId) -> Self {
        Self {
            book_id,
            processed_chunks: 0,
            total_chunks: 0,
            exact_word_count: 0,
            exact_token_count: 0,
        }
    }

    pub fn new(book_id: BookId, processed_chunks: u64, total_chunks: u64) -> Self {
        Self {
            book_id,
            processed_chunks,
            total_chunks,
            exact_word_count: 0,
            exact_token_count: 0,
        }
    }

    pub fn with_counts(mut self, words: u64, tokens: u64) -> Self {
        self.exact_word_count = words;
        self.exact_token_count = tokens;
        self
    }

    /// A job is complete iff the total is known and fully processed.
    pub fn is_complete(&self) -> bool {
        self.total_chunks > 0 && self.processed_chunks == self.total_chunks
    }

    /// Completed fraction in `[0, 1]`, or `0.0` while the total is unknown.
    pub fn ratio(&self) -> f64 {
        if self.total_chunks == 0 {
            0.0
        } else {
            self.processed_chunks as f64 / self.total_chunks as f64
        }
    }
}
