//! API route modules.
//!
//! Organizes routes by resource type.

pub mod diagnostics;
pub mod health;
pub mod logging;
pub mod media;
pub mod streams;

use axum::Router;

use crate::api::server::AppState;

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    let media_prefix = state.registry.config().media_url_prefix.clone();

    Router::new()
        .nest("/api/streams", streams::router())
        .nest("/api/logging", logging::router())
        .nest("/api/diagnostics", diagnostics::router())
        .nest(&media_prefix, media::router())
        .nest("/health", health::router())
        .with_state(state)
}
