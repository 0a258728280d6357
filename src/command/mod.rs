// Command publishing: read-modify-write partial updates and raw publishes

use crate::broker::{BrokerLink, LinkError};
use crate::extract::{build_nested, MAX_PATH_DEPTH};
use crate::state::{EntryOrigin, TopicStateStore};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Result of a publish request. Publishing never fails loudly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishOutcome {
    /// Handed to the broker client
    Sent,
    /// Rejected because the broker is not connected
    NotConnected,
    /// Client refused the request (queue full, client gone)
    Failed,
}

impl PublishOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, PublishOutcome::Sent)
    }
}

/// Publishes control intents.
///
/// Partial updates read the cached payload of the topic, shallow-merge the new
/// fields, publish the whole merged object and then overwrite the cache with
/// it. The read and the publish are not atomic: an inbound frame landing in
/// between is overwritten locally until the device reports again.
pub struct CommandPublisher {
    state: Arc<TopicStateStore>,
    link: Arc<dyn BrokerLink>,
    stale_after: Duration,
}

impl CommandPublisher {
    pub fn new(
        state: Arc<TopicStateStore>,
        link: Arc<dyn BrokerLink>,
        stale_after: Duration,
    ) -> Self {
        Self {
            state,
            link,
            stale_after,
        }
    }

    /// Set one top-level field of the topic payload
    pub fn publish_variable_update(
        &self,
        topic: &str,
        variable: &str,
        value: Value,
    ) -> PublishOutcome {
        let mut fields = Map::new();
        fields.insert(variable.to_string(), value);
        self.publish_merged(topic, fields)
    }

    /// Set a nested field given as a path (`setpoints.cabinet`, `zones[1].target`).
    ///
    /// The path is expanded into its nested object first, then merged shallowly:
    /// siblings under the same top-level key are replaced.
    pub fn publish_path_update(&self, topic: &str, path: &str, value: Value) -> PublishOutcome {
        match build_nested(path, value) {
            Some(Value::Object(fields)) => self.publish_merged(topic, fields),
            Some(_) => {
                warn!(topic = %topic, path = %path, "Path does not expand to an object");
                PublishOutcome::Failed
            }
            None => {
                warn!(
                    topic = %topic,
                    path_len = path.len(),
                    max_depth = MAX_PATH_DEPTH,
                    "Path is too deep"
                );
                PublishOutcome::Failed
            }
        }
    }

    /// Shallow-merge `fields` over the cached payload and publish the result
    pub fn publish_merged(&self, topic: &str, fields: Map<String, Value>) -> PublishOutcome {
        let mut merged = self.cached_object(topic);
        for (key, value) in fields {
            merged.insert(key, value);
        }
        let merged = Value::Object(merged);

        let outcome = self.send(topic, &merged);
        if outcome.is_sent() {
            // Optimistic: assume the publish round-trips
            self.state.set(topic, merged, EntryOrigin::Local);
        }
        outcome
    }

    /// Publish `payload` as-is; the cache is not touched
    pub fn publish_raw(&self, topic: &str, payload: &Value) -> PublishOutcome {
        self.send(topic, payload)
    }

    fn cached_object(&self, topic: &str) -> Map<String, Value> {
        let Some(entry) = self.state.entry(topic) else {
            return Map::new();
        };

        if let Ok(age) = entry.age().to_std() {
            if age > self.stale_after {
                warn!(
                    topic = %topic,
                    age_secs = age.as_secs(),
                    origin = ?entry.origin,
                    "Merging into stale topic state"
                );
            }
        }

        match entry.payload {
            Value::Object(map) => map,
            other => {
                warn!(
                    topic = %topic,
                    cached = %other,
                    "Cached payload is not an object, merging into an empty one"
                );
                Map::new()
            }
        }
    }

    fn send(&self, topic: &str, payload: &Value) -> PublishOutcome {
        if !self.link.is_connected() {
            warn!(topic = %topic, "Not connected, publish skipped");
            return PublishOutcome::NotConnected;
        }

        let bytes = match serde_json::to_vec(payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(topic = %topic, error = %e, "Failed to encode payload");
                return PublishOutcome::Failed;
            }
        };

        match self.link.publish(topic, bytes) {
            Ok(()) => {
                debug!(topic = %topic, "Published");
                PublishOutcome::Sent
            }
            Err(LinkError::NotConnected) => {
                warn!(topic = %topic, "Not connected, publish skipped");
                PublishOutcome::NotConnected
            }
            Err(e) => {
                error!(topic = %topic, error = %e, "Publish failed");
                PublishOutcome::Failed
            }
        }
    }
}
