use crate::alarm::{
    validate_snapshot, AlarmFilter, AlarmRecord, AlarmStatus, MonitoredWidget, ParseLabelError,
};
use crate::api::{ApiError, ApiState};
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Query parameters for alarm listing
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmQueryParams {
    /// ACTIVE | ACKNOWLEDGED | RESOLVED (case-insensitive)
    pub status: Option<String>,
    pub widget_id: Option<String>,
    pub owner_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AcknowledgeRequest {
    pub by: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcknowledgeAllRequest {
    pub owner_id: String,
    pub by: String,
}

#[derive(Debug, Serialize)]
pub struct AcknowledgeResponse {
    pub acknowledged: usize,
}

#[derive(Debug, Serialize)]
pub struct WidgetsResponse {
    pub monitored: usize,
}

pub fn create_alarms_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/widgets", get(list_widgets).put(replace_widgets))
        .route("/api/alarms", get(list_alarms))
        .route("/api/alarms/open", get(open_alarms))
        .route("/api/alarms/acknowledge-all", post(acknowledge_all))
        .route("/api/alarms/:id/acknowledge", post(acknowledge))
        .with_state(state)
}

/// GET /api/widgets - current monitored snapshot
async fn list_widgets(State(state): State<Arc<ApiState>>) -> Json<Vec<MonitoredWidget>> {
    Json(state.session.monitored_widgets())
}

/// PUT /api/widgets - replace the monitored snapshot as a whole
async fn replace_widgets(
    State(state): State<Arc<ApiState>>,
    Json(widgets): Json<Vec<MonitoredWidget>>,
) -> Result<Json<WidgetsResponse>, ApiError> {
    validate_snapshot(&widgets)?;

    info!(widgets = widgets.len(), "Monitored widget snapshot received");
    state.session.set_monitored_widgets(widgets);

    Ok(Json(WidgetsResponse {
        monitored: state.session.monitored_widgets().len(),
    }))
}

/// GET /api/alarms - alarm records, newest first
///
/// Query parameters (ANDed): `status`, `widgetId`, `ownerId`
async fn list_alarms(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<AlarmQueryParams>,
) -> Result<Json<Vec<AlarmRecord>>, ApiError> {
    let mut filter = AlarmFilter::default();

    if let Some(status) = params.status {
        let status: AlarmStatus = status
            .parse()
            .map_err(|e: ParseLabelError| ApiError::BadRequest(e.to_string()))?;
        filter = filter.status(status);
    }
    if let Some(widget_id) = params.widget_id {
        filter = filter.widget(widget_id);
    }
    if let Some(owner_id) = params.owner_id {
        filter = filter.owner(owner_id);
    }

    let records = state.session.alarm_store().select(&filter)?;
    Ok(Json(records))
}

/// GET /api/alarms/open - widget ids currently in alarm
async fn open_alarms(State(state): State<Arc<ApiState>>) -> Json<Vec<String>> {
    Json(state.session.open_alarms())
}

/// POST /api/alarms/:id/acknowledge
async fn acknowledge(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(request): Json<AcknowledgeRequest>,
) -> Result<Json<AcknowledgeResponse>, ApiError> {
    if request.by.trim().is_empty() {
        return Err(ApiError::BadRequest("by is required".to_string()));
    }

    let acknowledged = state.session.acknowledge_alarm(&id, &request.by)?;
    if acknowledged == 0 {
        return Err(ApiError::NotFound("Active alarm"));
    }

    Ok(Json(AcknowledgeResponse { acknowledged }))
}

/// POST /api/alarms/acknowledge-all
async fn acknowledge_all(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<AcknowledgeAllRequest>,
) -> Result<Json<AcknowledgeResponse>, ApiError> {
    if request.owner_id.trim().is_empty() || request.by.trim().is_empty() {
        return Err(ApiError::BadRequest("ownerId and by are required".to_string()));
    }

    let acknowledged = state
        .session
        .acknowledge_all_alarms(&request.owner_id, &request.by)?;

    Ok(Json(AcknowledgeResponse { acknowledged }))
}
