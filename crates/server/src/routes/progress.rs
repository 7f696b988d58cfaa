// crates/server/src/routes/progress.rs
//! Embedding progress endpoints.
//!
//! - `GET /api/progress/{book_id}/stream` — SSE stream of progress frames
//! - `GET /api/progress/{book_id}`        — JSON snapshot (fallback fetch/poll)

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::{Json, Router};
use tokio::sync::broadcast::error::RecvError;

use bookchat_types::{BookId, ProgressSnapshot};

use crate::auth::AuthToken;
use crate::state::AppState;

/// Build the progress sub-router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/progress/{book_id}", get(progress_snapshot))
        .route("/progress/{book_id}/stream", get(progress_stream))
}

/// GET /api/progress/{book_id} — current snapshot as a single JSON object.
///
/// Used by the client's one-shot fallback fetch and by the polling tier.
/// Books that never published report the zero snapshot.
pub async fn progress_snapshot(
    AuthToken(_token): AuthToken,
    Path(book_id): Path<BookId>,
    State(state): State<Arc<AppState>>,
) -> Json<ProgressSnapshot> {
    Json(state.broadcaster.snapshot(book_id))
}

/// GET /api/progress/{book_id}/stream — SSE stream of progress frames.
///
/// Subscribes before reading the initial snapshot so no update published in
/// between can be missed, then emits one `data:` frame per snapshot. The
/// stream carries no business logic: it never decides completion and never
/// closes on it — the client closes once it has seen the final frame, and
/// axum drops the stream (unsubscribing) when the connection goes away.
pub async fn progress_stream(
    AuthToken(_token): AuthToken,
    Path(book_id): Path<BookId>,
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let hub = Arc::clone(&state.broadcaster);
    let mut rx = hub.subscribe(book_id);

    let stream = async_stream::stream! {
        // A late subscriber must immediately see the current state, even if
        // nothing was ever published ({0,0}).
        yield Ok(frame(&hub.snapshot(book_id)));

        loop {
            match rx.recv().await {
                Ok(snapshot) => yield Ok(frame(&snapshot)),
                Err(RecvError::Lagged(skipped)) => {
                    // Intermediate ticks are droppable; resync from the store
                    // so the connection converges on the latest state.
                    tracing::warn!(book_id, skipped, "progress subscriber lagged, resyncing");
                    yield Ok(frame(&hub.snapshot(book_id)));
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn frame(snapshot: &ProgressSnapshot) -> Event {
    Event::default().data(serde_json::to_string(snapshot).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use futures_util::StreamExt;
    use std::time::Duration;
    use tower::ServiceExt;

    use crate::create_app;
    use bookchat_progress::ProgressBroadcaster;

    fn app_with_hub() -> (axum::Router, Arc<ProgressBroadcaster>) {
        let hub = Arc::new(ProgressBroadcaster::new());
        let app = create_app(AppState::with_broadcaster(Arc::clone(&hub)));
        (app, hub)
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("Authorization", "Bearer test-token")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn snapshot_requires_a_token() {
        let (app, _hub) = app_with_hub();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/progress/1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn snapshot_of_unknown_book_is_zero() {
        let (app, _hub) = app_with_hub();
        let response = app.oneshot(get_request("/api/progress/5")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["processedChunks"], 0);
        assert_eq!(json["totalChunks"], 0);
    }

    #[tokio::test]
    async fn snapshot_reflects_published_progress() {
        let (app, hub) = app_with_hub();
        hub.advance(42, 3, 10, 250, 310);

        let response = app.oneshot(get_request("/api/progress/42")).await.unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["processedChunks"], 3);
        assert_eq!(json["totalChunks"], 10);
        assert_eq!(json["exactWordCount"], 250);
        assert_eq!(json["exactTokenCount"], 310);
    }

    #[tokio::test]
    async fn stream_is_an_event_stream() {
        let (app, _hub) = app_with_hub();
        let response = app
            .oneshot(get_request("/api/progress/1/stream?token=ignored"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(
            content_type.contains("text/event-stream"),
            "Expected text/event-stream, got: {content_type}"
        );
    }

    #[tokio::test]
    async fn stream_emits_current_snapshot_first() {
        let (app, hub) = app_with_hub();
        // Job already at {5,5} — the late subscriber must see it, not {0,0}.
        hub.advance(9, 5, 5, 800, 950);

        let response = app.oneshot(get_request("/api/progress/9/stream")).await.unwrap();
        let mut body = response.into_body().into_data_stream();

        let chunk = tokio::time::timeout(Duration::from_secs(1), body.next())
            .await
            .expect("no initial frame within 1s")
            .expect("stream ended")
            .unwrap();
        let text = String::from_utf8(chunk.to_vec()).unwrap();
        assert!(text.contains("\"processedChunks\":5"), "frame: {text}");
        assert!(text.contains("\"totalChunks\":5"), "frame: {text}");
    }

    #[tokio::test]
    async fn stream_forwards_published_snapshots() {
        let (app, hub) = app_with_hub();

        let response = app.oneshot(get_request("/api/progress/3/stream")).await.unwrap();
        let mut body = response.into_body().into_data_stream();

        // Initial zero frame.
        let first = tokio::time::timeout(Duration::from_secs(1), body.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(String::from_utf8(first.to_vec())
            .unwrap()
            .contains("\"totalChunks\":0"));

        hub.advance(3, 2, 4, 0, 0);

        let second = tokio::time::timeout(Duration::from_secs(1), body.next())
            .await
            .expect("no frame after publish")
            .unwrap()
            .unwrap();
        let text = String::from_utf8(second.to_vec()).unwrap();
        assert!(text.contains("\"processedChunks\":2"), "frame: {text}");
    }

    #[tokio::test]
    async fn streams_of_different_books_are_isolated() {
        let (app, hub) = app_with_hub();

        let response = app.oneshot(get_request("/api/progress/1/stream")).await.unwrap();
        let mut body = response.into_body().into_data_stream();
        // Drain the initial frame.
        let _ = tokio::time::timeout(Duration::from_secs(1), body.next())
            .await
            .unwrap();

        // Publishing for another book must not produce a frame here.
        hub.advance(2, 1, 2, 0, 0);
        let extra = tokio::time::timeout(Duration::from_millis(200), body.next()).await;
        assert!(extra.is_err(), "received a frame for an unrelated book");
    }
}
