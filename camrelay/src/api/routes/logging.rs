//! Logging API routes.
//!
//! Read and replace the runtime log filter.

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{LoggingConfigResponse, ModuleInfo, UpdateLogFilterRequest};
use crate::api::server::AppState;
use crate::logging::{LoggingConfig, available_modules};

/// Create the logging router.
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_logging_config).put(update_logging_config))
}

fn logging_config(state: &AppState) -> ApiResult<&Arc<LoggingConfig>> {
    state
        .logging_config
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Logging configuration not available"))
}

fn response(config: &LoggingConfig) -> LoggingConfigResponse {
    LoggingConfigResponse {
        filter: config.get_filter(),
        available_modules: available_modules()
            .into_iter()
            .map(|(name, description)| ModuleInfo {
                name: name.to_string(),
                description: description.to_string(),
            })
            .collect(),
    }
}

async fn get_logging_config(
    State(state): State<AppState>,
) -> ApiResult<Json<LoggingConfigResponse>> {
    let config = logging_config(&state)?;
    Ok(Json(response(config)))
}

async fn update_logging_config(
    State(state): State<AppState>,
    Json(request): Json<UpdateLogFilterRequest>,
) -> ApiResult<Json<LoggingConfigResponse>> {
    let config = logging_config(&state)?;

    let filter = request.filter.trim();
    if filter.is_empty() {
        return Err(ApiError::bad_request("Filter directive must not be empty"));
    }

    config.set_filter(filter)?;
    Ok(Json(response(config)))
}
