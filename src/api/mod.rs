// HTTP and WebSocket surface over a telemetry session

pub mod alarms;
pub mod commands;
mod protocol;
mod socket;
pub mod topics;
pub mod websocket;

pub use protocol::{ClientMessage, ServerMessage};

use crate::alarm::{StoreError, WidgetValidationError};
use crate::session::TelemetrySession;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

/// Shared state for every API router
pub struct ApiState {
    pub session: Arc<TelemetrySession>,
}

/// Full API router (topics, commands, widgets/alarms, websocket)
pub fn create_router(session: Arc<TelemetrySession>) -> Router {
    let state = Arc::new(ApiState { session });

    Router::new()
        .merge(topics::create_topics_router(state.clone()))
        .merge(commands::create_commands_router(state.clone()))
        .merge(alarms::create_alarms_router(state.clone()))
        .merge(websocket::create_ws_router(state))
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// API error types
#[derive(Debug)]
pub enum ApiError {
    NotFound(&'static str),
    BadRequest(String),
    Store(StoreError),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Store(e)
    }
}

impl From<WidgetValidationError> for ApiError {
    fn from(e: WidgetValidationError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{} not found", what)),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Store(e) => {
                error!(error = %e, "Alarm store request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };

        let body = Json(ErrorResponse {
            error: error_message,
        });

        (status, body).into_response()
    }
}
