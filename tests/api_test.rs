// Integration tests for the HTTP surface over a detached session

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use frostline::alarm::{AlarmStore, MemoryAlarmStore};
use frostline::api::create_router;
use frostline::config::FrostlineConfig;
use frostline::session::TelemetrySession;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn widget_json() -> Value {
    json!({
        "id": "w1",
        "topic": "unit/1/telemetry",
        "variableName": "temp",
        "alarmMin": -25.0,
        "alarmMax": -15.0,
        "ownerId": "user1"
    })
}

fn create_test_app() -> (Arc<TelemetrySession>, Router) {
    let store: Arc<dyn AlarmStore> = Arc::new(MemoryAlarmStore::new());
    let session = TelemetrySession::detached(&FrostlineConfig::default(), store);
    let app = create_router(Arc::clone(&session));
    (session, app)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

/// GET /api/status reports a disconnected, empty session.
#[tokio::test]
async fn test_status_of_detached_session() {
    let (_session, app) = create_test_app();

    let (status, body) = send(&app, "GET", "/api/status", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "disconnected");
    assert_eq!(body["cachedTopics"], 0);
    assert_eq!(body["openAlarms"], 0);
    assert_eq!(body["router"]["framesReceived"], 0);
}

/// GET /api/topics/* returns 404 until a frame arrives, then the payload.
#[tokio::test]
async fn test_topic_state_lookup() {
    let (session, app) = create_test_app();

    let (status, body) = send(&app, "GET", "/api/topics/unit/1/telemetry", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Topic not found");

    session.router().handle_frame("unit/1/telemetry", br#"{"temp": -18.5, "door": "closed"}"#);

    let (status, body) = send(&app, "GET", "/api/topics/unit/1/telemetry", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["topic"], "unit/1/telemetry");
    assert_eq!(body["payload"]["temp"], -18.5);
    assert_eq!(body["origin"], "inbound");

    let (_, topics) = send(&app, "GET", "/api/topics", None).await;
    assert_eq!(topics, json!(["unit/1/telemetry"]));
}

/// Undecodable frames are dropped and counted.
#[tokio::test]
async fn test_malformed_frame_counted_as_dropped() {
    let (session, app) = create_test_app();

    assert!(!session.router().handle_frame("unit/1/telemetry", b"not json"));

    let (_, body) = send(&app, "GET", "/api/status", None).await;
    assert_eq!(body["router"]["framesReceived"], 1);
    assert_eq!(body["router"]["framesDropped"], 1);
    assert_eq!(body["cachedTopics"], 0);
}

/// PUT /api/widgets replaces the snapshot; GET returns it.
#[tokio::test]
async fn test_replace_widgets() {
    let (session, app) = create_test_app();

    let (status, body) = send(&app, "PUT", "/api/widgets", Some(json!([widget_json()]))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["monitored"], 1);

    let (_, widgets) = send(&app, "GET", "/api/widgets", None).await;
    assert_eq!(widgets[0]["id"], "w1");
    assert_eq!(widgets[0]["variableName"], "temp");

    assert!(session
        .active_topics()
        .contains(&"unit/1/telemetry".to_string()));
}

/// An invalid snapshot is rejected as a whole.
#[tokio::test]
async fn test_replace_widgets_rejects_invalid_snapshot() {
    let (session, app) = create_test_app();

    let mut broken = widget_json();
    broken["id"] = json!("");

    let (status, body) = send(
        &app,
        "PUT",
        "/api/widgets",
        Some(json!([widget_json(), broken])),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
    assert!(session.monitored_widgets().is_empty());
}

/// A threshold crossing shows up in the alarm listing and can be acknowledged.
#[tokio::test]
async fn test_alarm_listing_and_acknowledge() {
    let (session, app) = create_test_app();
    send(&app, "PUT", "/api/widgets", Some(json!([widget_json()]))).await;

    session.router().handle_frame("unit/1/telemetry", br#"{"temp": -10}"#);

    let (status, alarms) = send(&app, "GET", "/api/alarms?status=active", None).await;
    assert_eq!(status, StatusCode::OK);
    let alarms = alarms.as_array().unwrap().clone();
    assert_eq!(alarms.len(), 1);
    assert_eq!(alarms[0]["widgetId"], "w1");
    assert_eq!(alarms[0]["alarmType"], "HIGH");
    assert_eq!(alarms[0]["triggerValue"], -10.0);
    assert_eq!(alarms[0]["thresholdValue"], -15.0);

    let (_, open) = send(&app, "GET", "/api/alarms/open", None).await;
    assert_eq!(open, json!(["w1"]));

    let id = alarms[0]["id"].as_str().unwrap().to_string();
    let uri = format!("/api/alarms/{}/acknowledge", id);
    let (status, body) = send(&app, "POST", &uri, Some(json!({"by": "tech"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["acknowledged"], 1);

    // Already acknowledged
    let (status, _) = send(&app, "POST", &uri, Some(json!({"by": "tech"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, acked) = send(&app, "GET", "/api/alarms?status=ACKNOWLEDGED&ownerId=user1", None).await;
    assert_eq!(acked[0]["acknowledgedBy"], "tech");
}

/// Unknown status labels are a bad request.
#[tokio::test]
async fn test_alarm_listing_rejects_unknown_status() {
    let (_session, app) = create_test_app();

    let (status, _) = send(&app, "GET", "/api/alarms?status=sleeping", None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

/// POST /api/alarms/acknowledge-all acknowledges every active alarm of an owner.
#[tokio::test]
async fn test_acknowledge_all() {
    let (session, app) = create_test_app();
    let mut second = widget_json();
    second["id"] = json!("w2");
    second["variableName"] = json!("humidity");
    second["alarmMin"] = json!(30.0);
    second["alarmMax"] = json!(70.0);
    send(&app, "PUT", "/api/widgets", Some(json!([widget_json(), second]))).await;

    session.router().handle_frame("unit/1/telemetry", br#"{"temp": -10, "humidity": 90}"#);

    let (status, body) = send(
        &app,
        "POST",
        "/api/alarms/acknowledge-all",
        Some(json!({"ownerId": "user1", "by": "tech"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["acknowledged"], 2);
}

/// Commands on a detached session report NotConnected with 503.
#[tokio::test]
async fn test_command_without_broker_is_unavailable() {
    let (session, app) = create_test_app();

    let (status, body) = send(
        &app,
        "POST",
        "/api/commands/variable",
        Some(json!({"topic": "unit/1/cmd", "variable": "setpoint", "value": -20})),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["outcome"], "not_connected");
    assert_eq!(body["topic"], "unit/1/cmd");
    assert!(session.topic_state("unit/1/cmd").is_none());
}

/// Commands default to the configured command topic; wildcards are refused.
#[tokio::test]
async fn test_command_topic_handling() {
    let (_session, app) = create_test_app();

    let (_, body) = send(
        &app,
        "POST",
        "/api/commands/raw",
        Some(json!({"payload": {"defrost": true}})),
    )
    .await;
    assert_eq!(body["topic"], "units/commands");

    let (status, _) = send(
        &app,
        "POST",
        "/api/commands/raw",
        Some(json!({"topic": "units/+/cmd", "payload": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

/// Malformed or overly deep variable paths are a bad request, connected or not.
#[tokio::test]
async fn test_command_variable_path_is_validated() {
    let (session, app) = create_test_app();
    let deep = vec!["a"; 100_000].join(".");

    for variable in [deep.as_str(), "a..b", "zones[x]", "9lives"] {
        let (status, body) = send(
            &app,
            "POST",
            "/api/commands/variable",
            Some(json!({"topic": "unit/1/cmd", "variable": variable, "value": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    assert!(session.topic_state("unit/1/cmd").is_none());
}
