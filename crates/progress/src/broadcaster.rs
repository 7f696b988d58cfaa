// crates/progress/src/broadcaster.rs
//! Pub/sub hub fanning progress snapshots out to per-book subscribers.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::broadcast;

use bookchat_types::{BookId, ProgressSnapshot};

use crate::store::ProgressStore;

/// Bounded capacity of each per-book channel. A subscriber that falls more
/// than this many snapshots behind starts losing the oldest ones — only the
/// final complete snapshot must reliably arrive, and the transport resyncs
/// lagged subscribers from the store.
const CHANNEL_CAPACITY: usize = 64;

/// Publishes progress snapshots and fans them out to subscribers.
///
/// One `tokio::sync::broadcast` channel per book id keeps fan-out
/// per-subscriber: a slow or blocked receiver lags and drops old values but
/// can never stall [`publish`](Self::publish), other subscribers, or the
/// embedding pipeline. `publish` is infallible from the producer's view.
pub struct ProgressBroadcaster {
    store: ProgressStore,
    channels: RwLock<HashMap<BookId, broadcast::Sender<ProgressSnapshot>>>,
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self {
            store: ProgressStore::new(),
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Pipeline-facing entry point: advance book `book_id` to
    /// `(processed, total, words, tokens)`. Fire-and-forget.
    pub fn advance(&self, book_id: BookId, processed: u64, total: u64, words: u64, tokens: u64) {
        self.publish(ProgressSnapshot::new(book_id, processed, total).with_counts(words, tokens));
    }

    /// Update the store, then notify every current subscriber of the book.
    ///
    /// Never fails and never blocks on subscriber I/O. Send errors (no
    /// subscribers) are ignored.
    pub fn publish(&self, snapshot: ProgressSnapshot) {
        self.store.set(snapshot);

        let sender = match self.channels.read() {
            Ok(map) => map.get(&snapshot.book_id).cloned(),
            Err(e) => {
                tracing::error!("RwLock poisoned reading channels: {e}");
                None
            }
        };

        if let Some(tx) = sender {
            let _ = tx.send(snapshot);
            // A finished job with nobody listening has no reason to keep a
            // channel entry alive; the store entry remains readable.
            if snapshot.is_complete() && tx.receiver_count() == 0 {
                self.remove_channel(snapshot.book_id);
            }
        }
    }

    /// Subscribe to future snapshots of one book. Unsubscribe by dropping
    /// the receiver. Subscribers that fall behind receive
    /// `RecvError::Lagged` and should resync from [`snapshot`](Self::snapshot).
    pub fn subscribe(&self, book_id: BookId) -> broadcast::Receiver<ProgressSnapshot> {
        if let Ok(map) = self.channels.read() {
            if let Some(tx) = map.get(&book_id) {
                return tx.subscribe();
            }
        }
        match self.channels.write() {
            Ok(mut map) => map
                .entry(book_id)
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                .subscribe(),
            Err(e) => {
                tracing::error!("RwLock poisoned creating channel: {e}");
                // A receiver with no sender: yields Closed immediately.
                broadcast::channel(1).1
            }
        }
    }

    /// Latest snapshot for a book, or the zero snapshot if nothing was
    /// published yet — a late subscriber is never left blank.
    pub fn snapshot(&self, book_id: BookId) -> ProgressSnapshot {
        self.store
            .get(book_id)
            .unwrap_or_else(|| ProgressSnapshot::zero(book_id))
    }

    /// Reset a book to the zero snapshot before a job id is reused.
    pub fn reset(&self, book_id: BookId) {
        self.store.reset(book_id);
    }

    /// Number of live subscribers for a book.
    pub fn subscriber_count(&self, book_id: BookId) -> usize {
        match self.channels.read() {
            Ok(map) => map.get(&book_id).map_or(0, |tx| tx.receiver_count()),
            Err(_) => 0,
        }
    }

    fn remove_channel(&self, book_id: BookId) {
        if let Ok(mut map) = self.channels.write() {
            // Re-check under the write lock: a subscriber may have arrived
            // between the count read and here.
            if map.get(&book_id).is_some_and(|tx| tx.receiver_count() == 0) {
                map.remove(&book_id);
            }
        }
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn subscriber_receives_published_snapshots_in_order() {
        let hub = ProgressBroadcaster::new();
        let mut rx = hub.subscribe(42);

        hub.advance(42, 0, 10, 0, 0);
        hub.advance(42, 3, 10, 300, 400);

        assert_eq!(rx.recv().await.unwrap(), ProgressSnapshot::new(42, 0, 10));
        assert_eq!(
            rx.recv().await.unwrap(),
            ProgressSnapshot::new(42, 3, 10).with_counts(300, 400)
        );
    }

    #[tokio::test]
    async fn publish_updates_store_for_late_subscribers() {
        let hub = ProgressBroadcaster::new();
        hub.advance(7, 5, 5, 900, 1100);

        // Joined after completion: the snapshot read is {5,5}, not {0,0}.
        let snap = hub.snapshot(7);
        assert_eq!(snap.processed_chunks, 5);
        assert_eq!(snap.total_chunks, 5);
        assert!(snap.is_complete());
    }

    #[test]
    fn snapshot_of_unknown_book_is_zero() {
        let hub = ProgressBroadcaster::new();
        assert_eq!(hub.snapshot(99), ProgressSnapshot::zero(99));
    }

    #[tokio::test]
    async fn books_are_isolated_from_each_other() {
        let hub = ProgressBroadcaster::new();
        let mut rx_a = hub.subscribe(1);
        let mut rx_b = hub.subscribe(2);

        hub.advance(1, 4, 8, 0, 0);
        hub.advance(2, 1, 3, 0, 0);

        assert_eq!(rx_a.recv().await.unwrap().book_id, 1);
        assert_eq!(rx_b.recv().await.unwrap().book_id, 2);
        // Neither receiver has the other's snapshot queued.
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn slow_subscriber_never_blocks_publish() {
        let hub = Arc::new(ProgressBroadcaster::new());
        // Subscribed but never reading.
        let _stalled = hub.subscribe(1);
        let mut fast = hub.subscribe(2);

        // Far more publishes than the channel holds; must return promptly.
        let publisher = {
            let hub = Arc::clone(&hub);
            tokio::spawn(async move {
                for i in 0..1_000u64 {
                    hub.advance(1, i, 1_000, 0, 0);
                }
                hub.advance(2, 3, 3, 0, 0);
            })
        };
        tokio::time::timeout(Duration::from_secs(1), publisher)
            .await
            .expect("publish stalled on a blocked subscriber")
            .unwrap();

        let snap = tokio::time::timeout(Duration::from_secs(1), fast.recv())
            .await
            .expect("fast subscriber starved")
            .unwrap();
        assert!(snap.is_complete());
    }

    #[tokio::test]
    async fn lagged_subscriber_sees_lag_not_corruption() {
        let hub = ProgressBroadcaster::new();
        let mut rx = hub.subscribe(1);
        for i in 0..200u64 {
            hub.advance(1, i, 200, 0, 0);
        }
        // First recv reports the overflow; the store still has the truth.
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(n)) => assert!(n > 0),
            other => panic!("expected Lagged, got {other:?}"),
        }
        assert_eq!(hub.snapshot(1).processed_chunks, 199);
    }

    #[tokio::test]
    async fn dropped_subscriber_is_unregistered() {
        let hub = ProgressBroadcaster::new();
        let rx = hub.subscribe(9);
        assert_eq!(hub.subscriber_count(9), 1);
        drop(rx);
        assert_eq!(hub.subscriber_count(9), 0);

        // Completing with nobody listening prunes the channel entry but
        // keeps the snapshot readable.
        hub.advance(9, 2, 2, 0, 0);
        assert!(hub.snapshot(9).is_complete());
    }

    #[tokio::test]
    async fn publish_is_safe_from_concurrent_producers() {
        let hub = Arc::new(ProgressBroadcaster::new());
        let tasks: Vec<_> = (0..8u64)
            .map(|book| {
                let hub = Arc::clone(&hub);
                tokio::spawn(async move {
                    for i in 0..=50 {
                        hub.advance(book, i, 50, 0, 0);
                    }
                })
            })
            .collect();
        for t in tasks {
            t.await.unwrap();
        }
        for book in 0..8 {
            assert!(hub.snapshot(book).is_complete());
        }
    }

    #[tokio::test]
    async fn reset_allows_job_id_reuse() {
        let hub = ProgressBroadcaster::new();
        hub.advance(3, 5, 5, 0, 0);
        assert!(hub.snapshot(3).is_complete());

        hub.reset(3);
        assert_eq!(hub.snapshot(3), ProgressSnapshot::zero(3));
    }
}
