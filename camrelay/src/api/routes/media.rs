//! Media routes.
//!
//! Serves manifests and segments of live sessions. Artifacts are ephemeral, so
//! every response carries `no-store`, and players on any origin may fetch them.

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;

use crate::api::error::ApiError;
use crate::api::server::AppState;

const MEDIA_HEADERS: [(header::HeaderName, &str); 2] = [
    (header::CACHE_CONTROL, "no-store"),
    (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
];

/// Create the media router.
pub fn router() -> Router<AppState> {
    Router::new().route(
        "/{stream_id}/{*artifact}",
        get(serve_artifact).options(media_options),
    )
}

async fn serve_artifact(
    State(state): State<AppState>,
    Path((stream_id, artifact)): Path<(String, String)>,
) -> Response {
    match state.registry.serve(&stream_id, &artifact).await {
        Ok(artifact) => (
            MEDIA_HEADERS,
            [(header::CONTENT_TYPE, artifact.content_type)],
            artifact.bytes,
        )
            .into_response(),
        Err(e) => (MEDIA_HEADERS, ApiError::from(e)).into_response(),
    }
}

async fn media_options() -> impl IntoResponse {
    (
        StatusCode::NO_CONTENT,
        MEDIA_HEADERS,
        [
            (header::ACCESS_CONTROL_ALLOW_METHODS, "GET, HEAD, OPTIONS"),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "Range"),
        ],
    )
}
