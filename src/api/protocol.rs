use crate::alarm::AlarmEvent;
use crate::broker::ConnectionStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client → Server message types
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "subscribe")]
    Subscribe { topic: String },
    #[serde(rename = "unsubscribe")]
    Unsubscribe { topic: String },
}

/// Server → Client message types
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Decoded payload for a subscribed topic
    Payload {
        topic: String,
        payload: Value,
        timestamp: DateTime<Utc>,
    },
    /// Alarm raised or resolved
    Alarm { alarm: AlarmEvent },
    /// Broker connection status changed
    Status { status: ConnectionStatus },
    /// Rejected client message
    Error { message: String },
}

impl ServerMessage {
    pub fn payload(topic: impl Into<String>, payload: Value) -> Self {
        ServerMessage::Payload {
            topic: topic.into(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_messages_parse() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","topic":"unit/1/telemetry"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Subscribe {
                topic: "unit/1/telemetry".to_string()
            }
        );

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"unsubscribe","topic":"unit/1"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Unsubscribe { .. }));

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"publish"}"#).is_err());
    }

    #[test]
    fn test_server_messages_are_tagged() {
        let json = serde_json::to_value(ServerMessage::payload("unit/1", json!({"temp": -18})))
            .unwrap();
        assert_eq!(json["type"], "payload");
        assert_eq!(json["topic"], "unit/1");
        assert_eq!(json["payload"]["temp"], -18);

        let json = serde_json::to_value(ServerMessage::Status {
            status: ConnectionStatus::Connected,
        })
        .unwrap();
        assert_eq!(json, json!({"type": "status", "status": "connected"}));
    }
}
