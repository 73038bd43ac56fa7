//! Stream lifecycle routes.

use std::convert::Infallible;

use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
};
use futures::Stream;
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{StartStreamRequest, StreamListResponse};
use crate::api::server::AppState;
use crate::registry::StreamStatus;
use crate::supervisor::StreamEvent;

/// Create the streams router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_streams))
        .route("/events", get(stream_events))
        .route(
            "/{id}",
            get(get_stream).post(start_stream).delete(stop_stream),
        )
}

/// Start a stream or join its running session, then wait until it is playable.
async fn start_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<StartStreamRequest>, JsonRejection>,
) -> ApiResult<Json<StreamStatus>> {
    let Json(request) = payload.map_err(|rejection| {
        ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "INVALID_DESCRIPTOR",
            rejection.body_text(),
        )
        .with_details(serde_json::json!({ "stage": "resolve" }))
    })?;

    let status = state
        .registry
        .get_or_start(&id, &request.source, request.audio)
        .await?;
    Ok(Json(status))
}

async fn get_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<StreamStatus>> {
    state
        .registry
        .status(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Stream '{}' not found", id)))
}

/// Stop a stream. Idempotent.
async fn stop_stream(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    state.registry.stop(&id).await;
    StatusCode::NO_CONTENT
}

async fn list_streams(State(state): State<AppState>) -> Json<StreamListResponse> {
    let items = state.registry.list_status();
    Json(StreamListResponse {
        active: state.registry.list_active(),
        total: items.len(),
        items,
    })
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Only forward events of this stream.
    pub stream_id: Option<String>,
}

/// Server-sent lifecycle events.
async fn stream_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.registry.subscribe();

    let stream = futures::stream::unfold(
        (rx, query.stream_id),
        |(mut rx, filter)| async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        let comment = Event::default().comment(format!("skipped {skipped} events"));
                        return Some((Ok(comment), (rx, filter)));
                    }
                    Err(RecvError::Closed) => return None,
                };

                if let Some(id) = &filter
                    && event.stream_id() != id
                {
                    continue;
                }

                return Some((Ok(to_sse(&event)), (rx, filter)));
            }
        },
    );

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn to_sse(event: &StreamEvent) -> Event {
    match Event::default().event(event.kind()).json_data(event) {
        Ok(sse) => sse,
        Err(e) => {
            warn!("Failed to serialize stream event: {}", e);
            Event::default().comment("unserializable event")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamConfig;
    use crate::registry::StreamRegistry;
    use crate::transcoder::testing::MissingTranscoder;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn app(temp: &TempDir) -> Router {
        let config = StreamConfig {
            media_dir: temp.path().to_path_buf(),
            ..Default::default()
        };
        let registry = Arc::new(StreamRegistry::new(config, Arc::new(MissingTranscoder)));
        Router::new()
            .nest("/api/streams", router())
            .with_state(AppState::new(registry))
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn empty_address_is_invalid_descriptor() {
        let temp = TempDir::new().unwrap();
        let response = app(&temp)
            .oneshot(post("/api/streams/cam1", r#"{"source": {"address": ""}}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = json_body(response).await;
        assert_eq!(body["code"], "INVALID_DESCRIPTOR");
        assert_eq!(body["details"]["stage"], "resolve");
    }

    #[tokio::test]
    async fn unknown_vendor_is_invalid_descriptor() {
        let temp = TempDir::new().unwrap();
        let response = app(&temp)
            .oneshot(post(
                "/api/streams/cam1",
                r#"{"source": {"address": "10.0.0.5", "vendor": "acme"}}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json_body(response).await["code"], "INVALID_DESCRIPTOR");
    }

    #[tokio::test]
    async fn missing_transcoder_is_service_unavailable() {
        let temp = TempDir::new().unwrap();
        let response = app(&temp)
            .oneshot(post(
                "/api/streams/cam1",
                r#"{"source": {"address": "10.0.0.5", "vendor": "hikvision"}}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = json_body(response).await;
        assert_eq!(body["code"], "TOOL_UNAVAILABLE");
        assert_eq!(body["details"]["stage"], "spawn");
    }

    #[tokio::test]
    async fn unknown_stream_status_is_not_found() {
        let temp = TempDir::new().unwrap();
        let response = app(&temp)
            .oneshot(
                Request::builder()
                    .uri("/api/streams/cam1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let app = app(&temp);

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method("DELETE")
                        .uri("/api/streams/cam1")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }
    }

    #[tokio::test]
    async fn list_is_empty_initially() {
        let temp = TempDir::new().unwrap();
        let response = app(&temp)
            .oneshot(
                Request::builder()
                    .uri("/api/streams")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["total"], 0);
        assert!(body["active"].as_array().unwrap().is_empty());
    }
}
