// crates/server/src/routes/mod.rs
//! API route definitions.

pub mod health;
pub mod progress;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;

/// Build the `/api` router with all endpoints.
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest(
            "/api",
            Router::new()
                .route("/health", get(health::health))
                .merge(progress::router()),
        )
        .with_state(state)
}
