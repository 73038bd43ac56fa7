//! Diagnostic routes.
//!
//! A bare TCP reachability check of a camera. Passing it does not mean a
//! stream will start; only the readiness gate decides that.

use std::time::Duration;

use axum::{Json, Router, extract::State, routing::post};

use crate::api::error::ApiResult;
use crate::api::models::{ReachabilityRequest, ReachabilityResponse};
use crate::api::server::AppState;
use crate::source::{self, check_reachable, redact_url};

const DEFAULT_TIMEOUT_MS: u64 = 3_000;
const MAX_TIMEOUT_MS: u64 = 30_000;

/// Create the diagnostics router.
pub fn router() -> Router<AppState> {
    Router::new().route("/reachability", post(reachability))
}

async fn reachability(
    State(_state): State<AppState>,
    Json(request): Json<ReachabilityRequest>,
) -> ApiResult<Json<ReachabilityResponse>> {
    let pull_url = source::resolve(&request.source)?;
    let timeout_ms = request
        .timeout_ms
        .unwrap_or(DEFAULT_TIMEOUT_MS)
        .clamp(1, MAX_TIMEOUT_MS);

    let report = check_reachable(&pull_url, Duration::from_millis(timeout_ms)).await?;
    Ok(Json(ReachabilityResponse {
        source: redact_url(&pull_url),
        report,
    }))
}
