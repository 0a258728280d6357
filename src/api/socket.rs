use crate::api::protocol::{ClientMessage, ServerMessage};
use crate::router::TopicSubscription;
use crate::session::TelemetrySession;
use axum::extract::ws::{Message, WebSocket};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::StreamMap;
use tracing::{debug, error, info, warn};

/// One dashboard WebSocket: topic subscriptions plus alarm and status pushes
pub struct SocketSession {
    session: Arc<TelemetrySession>,
    subscriptions: StreamMap<String, TopicSubscription>,
}

impl SocketSession {
    pub fn new(session: Arc<TelemetrySession>) -> Self {
        Self {
            session,
            subscriptions: StreamMap::new(),
        }
    }

    /// Handle WebSocket connection lifecycle
    pub async fn handle(mut self, mut socket: WebSocket) {
        info!("WebSocket connection established");

        let mut alarm_rx = self.session.alarm_events();
        let (status_tx, mut status_rx) = mpsc::unbounded_channel();
        let status_handle = self.session.on_status_change(move |status| {
            let _ = status_tx.send(status);
        });

        loop {
            tokio::select! {
                // Incoming client messages
                msg = socket.recv() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let reply = self.handle_client_message(&text);
                            if let Some(reply) = reply {
                                if send(&mut socket, &reply).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("WebSocket client disconnected");
                            break;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = socket.send(Message::Pong(data)).await {
                                error!(error = %e, "Failed to send pong");
                                break;
                            }
                        }
                        Some(Ok(_)) => {
                            // Ignore binary, pong messages
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "WebSocket error");
                            break;
                        }
                    }
                }

                // Payloads for subscribed topics
                Some((topic, payload)) = self.subscriptions.next() => {
                    if send(&mut socket, &ServerMessage::payload(topic, payload)).await.is_err() {
                        break;
                    }
                }

                // Alarm transitions
                result = alarm_rx.recv() => {
                    match result {
                        Ok(alarm) => {
                            if send(&mut socket, &ServerMessage::Alarm { alarm }).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped = skipped, "WebSocket lagged, skipped alarm events");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            error!("Alarm event channel closed");
                            break;
                        }
                    }
                }

                // Connection status changes
                Some(status) = status_rx.recv() => {
                    if send(&mut socket, &ServerMessage::Status { status }).await.is_err() {
                        break;
                    }
                }
            }
        }

        status_handle.unsubscribe();
        info!(
            subscriptions = self.subscriptions.len(),
            "WebSocket connection closed"
        );
    }

    /// Apply a subscribe/unsubscribe request; returns an immediate reply, if any
    fn handle_client_message(&mut self, text: &str) -> Option<ServerMessage> {
        let msg: ClientMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                return Some(ServerMessage::Error {
                    message: format!("invalid message: {}", e),
                })
            }
        };

        match msg {
            ClientMessage::Subscribe { topic } => {
                if topic.is_empty() || topic.contains(|c: char| c == '+' || c == '#') {
                    return Some(ServerMessage::Error {
                        message: format!("cannot subscribe to '{}'", topic),
                    });
                }
                if self.subscriptions.contains_key(&topic) {
                    return None;
                }

                info!(topic = %topic, "Client subscribed to topic");
                let subscription = self.session.subscribe(&topic);
                self.subscriptions.insert(topic.clone(), subscription);

                // Current state first so the dashboard does not wait for the next frame
                self.session
                    .topic_state(&topic)
                    .map(|entry| ServerMessage::payload(topic, entry.payload))
            }
            ClientMessage::Unsubscribe { topic } => {
                debug!(topic = %topic, "Client unsubscribed from topic");
                self.subscriptions.remove(&topic);
                None
            }
        }
    }
}

async fn send(socket: &mut WebSocket, msg: &ServerMessage) -> anyhow::Result<()> {
    let json = serde_json::to_string(msg)?;
    if let Err(e) = socket.send(Message::Text(json)).await {
        error!(error = %e, "Failed to send WebSocket message");
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::MemoryAlarmStore;
    use crate::config::FrostlineConfig;
    use serde_json::json;

    fn socket_session() -> (Arc<TelemetrySession>, SocketSession) {
        let session = TelemetrySession::detached(
            &FrostlineConfig::default(),
            Arc::new(MemoryAlarmStore::new()),
        );
        (session.clone(), SocketSession::new(session))
    }

    fn subscribe(topic: &str) -> String {
        json!({"type": "subscribe", "topic": topic}).to_string()
    }

    #[tokio::test]
    async fn test_subscribe_replays_cached_state() {
        let (session, mut socket) = socket_session();
        session
            .router()
            .handle_frame("unit/1/telemetry", br#"{"temp": -19}"#);

        let reply = socket.handle_client_message(&subscribe("unit/1/telemetry"));

        match reply {
            Some(ServerMessage::Payload { topic, payload, .. }) => {
                assert_eq!(topic, "unit/1/telemetry");
                assert_eq!(payload, json!({"temp": -19}));
            }
            other => panic!("expected cached payload, got {:?}", other),
        }
        assert!(session
            .active_topics()
            .contains(&"unit/1/telemetry".to_string()));
    }

    #[tokio::test]
    async fn test_subscribe_without_state_is_silent_then_streams() {
        let (session, mut socket) = socket_session();

        assert!(socket
            .handle_client_message(&subscribe("unit/2/telemetry"))
            .is_none());

        session
            .router()
            .handle_frame("unit/2/telemetry", br#"{"temp": -21}"#);
        let (topic, payload) = socket.subscriptions.next().await.unwrap();
        assert_eq!(topic, "unit/2/telemetry");
        assert_eq!(payload, json!({"temp": -21}));
    }

    #[tokio::test]
    async fn test_wildcard_and_empty_topics_are_rejected() {
        let (session, mut socket) = socket_session();

        for topic in ["units/+/telemetry", "units/#", ""] {
            let reply = socket.handle_client_message(&subscribe(topic));
            assert!(matches!(reply, Some(ServerMessage::Error { .. })), "{topic}");
        }

        assert!(socket.subscriptions.is_empty());
        assert_eq!(session.router().consumer_topics().len(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_subscribe_keeps_one_consumer() {
        let (session, mut socket) = socket_session();

        socket.handle_client_message(&subscribe("unit/3/telemetry"));
        socket.handle_client_message(&subscribe("unit/3/telemetry"));

        assert_eq!(socket.subscriptions.len(), 1);
        assert_eq!(session.router().consumer_count("unit/3/telemetry"), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_releases_topic() {
        let (session, mut socket) = socket_session();
        socket.handle_client_message(&subscribe("unit/4/telemetry"));

        let reply = socket.handle_client_message(
            &json!({"type": "unsubscribe", "topic": "unit/4/telemetry"}).to_string(),
        );

        assert!(reply.is_none());
        assert!(socket.subscriptions.is_empty());
        assert_eq!(session.router().consumer_count("unit/4/telemetry"), 0);
        assert!(!session
            .active_topics()
            .contains(&"unit/4/telemetry".to_string()));
    }

    #[tokio::test]
    async fn test_malformed_message_gets_error_reply() {
        let (_session, mut socket) = socket_session();

        for text in ["not json", r#"{"type": "publish", "topic": "x"}"#, r#"{"topic": "x"}"#] {
            let reply = socket.handle_client_message(text);
            assert!(matches!(reply, Some(ServerMessage::Error { .. })), "{text}");
        }
    }
}
