//! Health check routes.

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};

use crate::api::models::{ComponentHealth, HealthResponse};
use crate::api::server::AppState;

/// Create the health router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/live", get(liveness_check))
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = state.start_time.elapsed().as_secs();
    let registry = &state.registry;

    let transcoder = registry.transcoder();
    let transcoder_health = match transcoder.version() {
        Some(version) => ComponentHealth {
            name: transcoder.name().to_string(),
            status: "healthy".to_string(),
            message: Some(version),
        },
        None => ComponentHealth {
            name: transcoder.name().to_string(),
            status: "unhealthy".to_string(),
            message: Some("binary not found or not executable".to_string()),
        },
    };

    let media_root = registry.store().root();
    let media_health = match tokio::fs::metadata(media_root).await {
        Ok(meta) if meta.is_dir() => ComponentHealth {
            name: "media_store".to_string(),
            status: "healthy".to_string(),
            message: None,
        },
        _ => ComponentHealth {
            name: "media_store".to_string(),
            status: "unhealthy".to_string(),
            message: Some(format!("{} is not a directory", media_root.display())),
        },
    };

    let components = vec![transcoder_health, media_health];
    let status = if components.iter().all(|c| c.status == "healthy") {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: uptime,
        active_streams: registry.list_active().len(),
        components,
    })
}

/// Readiness check - can the service start streams?
/// Returns HTTP 503 when the transcoder binary is unavailable.
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.registry.transcoder().is_available() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

/// Liveness check - is the service alive?
/// Returns HTTP 200 with status and uptime if the service is responsive.
async fn liveness_check(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed().as_secs();
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "alive",
            "uptime_secs": uptime
        })),
    )
}
