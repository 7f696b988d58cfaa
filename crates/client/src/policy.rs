// crates/client/src/policy.rs
//! The mid-stream failure decision table, isolated from any I/O so every
//! branch is unit-testable.

use bookchat_types::ProgressSnapshot;

/// Streams that fail past this completed fraction are treated as finished
/// jobs masked by a transport hiccup. The boundary is exclusive: exactly 0.9
/// still surfaces an error. A job that genuinely stalls above the threshold
/// will be misreported as complete; documented approximation, kept as
/// specified behavior.
const NEAR_COMPLETE_RATIO: f64 = 0.9;

/// What to do when the stream fails mid-flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// We initiated the close (or were about to); say nothing.
    Ignore,
    /// Near-certain completion: synthesize the final update and complete.
    SilentComplete,
    /// Nothing real was ever received: try one direct snapshot fetch, and
    /// surface the error only if that also fails.
    FetchOnce,
    /// Deliver the error to the caller, exactly once.
    Surface,
}

/// Classify a mid-stream transport failure.
///
/// `primed` means at least one snapshot with a known total was received;
/// `last` is the most recent snapshot seen on the stream.
pub fn classify_stream_error(
    primed: bool,
    expecting_close: bool,
    last: &ProgressSnapshot,
) -> ErrorDisposition {
    if expecting_close {
        return ErrorDisposition::Ignore;
    }
    if !primed {
        return ErrorDisposition::FetchOnce;
    }
    if last.processed_chunks > 0 && last.ratio() > NEAR_COMPLETE_RATIO {
        ErrorDisposition::SilentComplete
    } else {
        ErrorDisposition::Surface
    }
}
