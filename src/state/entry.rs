use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where the cached payload for a topic came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryOrigin {
    /// Decoded from a broker frame
    Inbound,
    /// Written optimistically after a local publish
    Local,
}

/// Last-known full payload for one topic
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TopicEntry {
    /// Topic name (e.g., "unit/1/telemetry")
    pub topic: String,

    /// Full decoded JSON payload
    pub payload: Value,

    /// Last write timestamp
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,

    pub origin: EntryOrigin,
}

impl TopicEntry {
    /// Time since the entry was last written
    pub fn age(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.updated_at)
    }
}
