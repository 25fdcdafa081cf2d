//! Vocalis Gateway: HTTP surface of the voice relay.
//!
//! Routes are thin: they decode the request, hand it to the [`TurnProcessor`] and map
//! [`TurnError`]s to JSON `{error}` bodies. Synthesized replies are served from the audio
//! directory under `/audio`, and everything else falls through to the static client.

pub mod routes;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use vocalis_core::{TurnError, TurnProcessor, AUDIO_ROUTE_PREFIX};

/// Upload ceiling for voice clips.
pub const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Body of every 500 response.
pub const MSG_SERVER_ERROR: &str = "Произошла ошибка на сервере.";

#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<TurnProcessor>,
}

impl AppState {
    pub fn new(processor: TurnProcessor) -> Self {
        Self {
            processor: Arc::new(processor),
        }
    }

    /// Map a turn failure to a response, logging server-side failures with their cause.
    pub fn turn_failure(&self, session_id: &str, err: TurnError) -> ApiError {
        if err.is_client_error() {
            return ApiError::BadRequest(err.to_string());
        }
        tracing::error!("Turn failed for session {}: {}", session_id, err);
        self.processor.report_failure(session_id, &err);
        ApiError::Internal
    }
}

/// Error returned to clients as `{"error": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                MSG_SERVER_ERROR.to_string(),
            ),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub fn build_app(state: AppState, public_dir: &Path, audio_dir: &Path) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/chat/text", post(routes::chat_text))
        .route("/api/chat/voice", post(routes::chat_voice))
        .route("/api/chat/clear", post(routes::clear_history))
        .route("/api/roles", get(routes::list_roles))
        .route("/api/roles/:role_id", get(routes::get_role))
        .with_state(state)
        .nest_service(AUDIO_ROUTE_PREFIX, ServeDir::new(audio_dir))
        .fallback_service(ServeDir::new(public_dir))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
}
