// crates/progress/src/store.rs
//! Process-wide map from book id to the latest progress snapshot.

use std::collections::HashMap;
use std::sync::RwLock;

use bookchat_types::{BookId, ProgressSnapshot};

/// Latest-snapshot store, keyed by book id.
///
/// Uses `std::sync::RwLock` (not `tokio::sync::RwLock`) because writes are
/// tiny, reads are uncontended, and the lock is never held across an
/// `.await` point.
pub struct ProgressStore {
    inner: RwLock<HashMap<BookId, ProgressSnapshot>>,
}

impl ProgressStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Latest snapshot for a book, or `None` if nothing was ever published.
    pub fn get(&self, book_id: BookId) -> Option<ProgressSnapshot> {
        match self.inner.read() {
            Ok(map) => map.get(&book_id).copied(),
            Err(e) => {
                tracing::error!("RwLock poisoned reading progress store: {e}");
                None
            }
        }
    }

    /// Overwrite the snapshot for `snapshot.book_id`. No merge logic —
    /// callers pass the full current snapshot.
    pub fn set(&self, snapshot: ProgressSnapshot) {
        match self.inner.write() {
            Ok(mut map) => {
                map.insert(snapshot.book_id, snapshot);
            }
            Err(e) => tracing::error!("RwLock poisoned writing progress store: {e}"),
        }
    }

    /// Explicitly reset a book to the zero snapshot. Required before a job
    /// id is reused, since entries are never evicted by this subsystem.
    pub fn reset(&self, book_id: BookId) {
        self.set(ProgressSnapshot::zero(book_id));
    }
}

impl Default for ProgressStore {
    fn default() -> Self {
        Self::new()
    }
}
