use crate::api::{ApiError, ApiState};
use crate::broker::ConnectionStatus;
use crate::router::RouterStats;
use crate::state::EntryOrigin;
use axum::{
    extract::{Path, State},
    response::Json,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: ConnectionStatus,
    pub active_topics: Vec<String>,
    pub cached_topics: usize,
    pub open_alarms: usize,
    pub router: RouterStats,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicResponse {
    pub topic: String,
    pub payload: Value,
    pub updated_at: DateTime<Utc>,
    pub origin: EntryOrigin,
}

pub fn create_topics_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/topics", get(list_topics))
        .route("/api/topics/*topic", get(get_topic))
        .with_state(state)
}

/// GET /api/status - connection status and counters
async fn get_status(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    let session = &state.session;
    Json(StatusResponse {
        status: session.status(),
        active_topics: session.active_topics(),
        cached_topics: session.cached_topics().len(),
        open_alarms: session.open_alarms().len(),
        router: session.router_stats(),
    })
}

/// GET /api/topics - topics with a cached payload, sorted
async fn list_topics(State(state): State<Arc<ApiState>>) -> Json<Vec<String>> {
    Json(state.session.cached_topics())
}

/// GET /api/topics/*topic - last-known payload of one topic
async fn get_topic(
    State(state): State<Arc<ApiState>>,
    Path(topic): Path<String>,
) -> Result<Json<TopicResponse>, ApiError> {
    let entry = state
        .session
        .topic_state(&topic)
        .ok_or(ApiError::NotFound("Topic"))?;

    Ok(Json(TopicResponse {
        topic: entry.topic,
        payload: entry.payload,
        updated_at: entry.updated_at,
        origin: entry.origin,
    }))
}
