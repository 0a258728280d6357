use crate::api::socket::SocketSession;
use crate::api::ApiState;
use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::Response,
    routing::get,
    Router,
};
use std::sync::Arc;
use tracing::info;

/// GET /api/ws - WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<ApiState>>) -> Response {
    info!("WebSocket upgrade request received");
    let session = Arc::clone(&state.session);
    ws.on_upgrade(move |socket| SocketSession::new(session).handle(socket))
}

pub fn create_ws_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/ws", get(ws_handler))
        .with_state(state)
}
