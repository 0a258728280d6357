use crate::api::{ApiError, ApiState};
use crate::command::PublishOutcome;
use crate::extract::{is_valid_path, MAX_PATH_DEPTH};
use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// POST /api/commands/variable body
#[derive(Debug, Deserialize)]
pub struct VariableCommand {
    /// Defaults to the configured command topic
    #[serde(default)]
    pub topic: Option<String>,
    /// Top-level field, or a path such as `setpoints.cabinet`
    pub variable: String,
    pub value: Value,
}

/// POST /api/commands/raw body
#[derive(Debug, Deserialize)]
pub struct RawCommand {
    #[serde(default)]
    pub topic: Option<String>,
    pub payload: Value,
}

#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub topic: String,
    pub outcome: PublishOutcome,
}

pub fn create_commands_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/commands/variable", post(publish_variable))
        .route("/api/commands/raw", post(publish_raw))
        .with_state(state)
}

fn command_topic(state: &ApiState, requested: Option<String>) -> Result<String, ApiError> {
    let topic = requested.unwrap_or_else(|| state.session.command_topic().to_string());
    if topic.is_empty() {
        return Err(ApiError::BadRequest("topic is required".to_string()));
    }
    if topic.contains(|c: char| c == '+' || c == '#') {
        return Err(ApiError::BadRequest(
            "cannot publish to a wildcard topic".to_string(),
        ));
    }
    Ok(topic)
}

fn respond(topic: String, outcome: PublishOutcome) -> (StatusCode, Json<CommandResponse>) {
    let status = match outcome {
        PublishOutcome::Sent => StatusCode::OK,
        PublishOutcome::NotConnected => StatusCode::SERVICE_UNAVAILABLE,
        PublishOutcome::Failed => StatusCode::BAD_GATEWAY,
    };
    (status, Json(CommandResponse { topic, outcome }))
}

/// POST /api/commands/variable - merge one variable into the topic state and publish
async fn publish_variable(
    State(state): State<Arc<ApiState>>,
    Json(command): Json<VariableCommand>,
) -> Result<(StatusCode, Json<CommandResponse>), ApiError> {
    let topic = command_topic(&state, command.topic)?;
    let variable = command.variable.trim();
    if variable.is_empty() {
        return Err(ApiError::BadRequest("variable is required".to_string()));
    }
    if !is_valid_path(variable) {
        return Err(ApiError::BadRequest(format!(
            "variable must be a path such as setpoints.cabinet or zones[1].target, at most {} segments deep",
            MAX_PATH_DEPTH
        )));
    }

    let nested = variable.contains(|c: char| c == '.' || c == '[');
    let outcome = if nested {
        state
            .session
            .publish_path_update(&topic, variable, command.value)
    } else {
        state
            .session
            .publish_variable_update(&topic, variable, command.value)
    };

    Ok(respond(topic, outcome))
}

/// POST /api/commands/raw - publish a payload as-is
async fn publish_raw(
    State(state): State<Arc<ApiState>>,
    Json(command): Json<RawCommand>,
) -> Result<(StatusCode, Json<CommandResponse>), ApiError> {
    let topic = command_topic(&state, command.topic)?;
    let outcome = state.session.publish_raw(&topic, &command.payload);
    Ok(respond(topic, outcome))
}
