use crate::state::entry::{EntryOrigin, TopicEntry};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, info};

/// Topic state store keeps the last-known payload per topic in memory
pub struct TopicStateStore {
    /// Lock-free concurrent map for fast reads
    entries: DashMap<String, TopicEntry>,
}

impl TopicStateStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Overwrite the payload for a topic (last-write-wins, no merge)
    ///
    /// Creates the entry on first write. Returns the previous payload, if any.
    pub fn set(&self, topic: &str, payload: Value, origin: EntryOrigin) -> Option<Value> {
        let entry = TopicEntry {
            topic: topic.to_string(),
            payload,
            updated_at: Utc::now(),
            origin,
        };

        let previous = self
            .entries
            .insert(topic.to_string(), entry)
            .map(|old| old.payload);

        debug!(topic = %topic, origin = ?origin, "Topic state updated");
        previous
    }

    /// Get the cached payload for a topic
    pub fn get(&self, topic: &str) -> Option<Value> {
        self.entries.get(topic).map(|e| e.payload.clone())
    }

    /// Get the cached entry (payload plus write metadata) for a topic
    pub fn entry(&self, topic: &str) -> Option<TopicEntry> {
        self.entries.get(topic).map(|e| e.clone())
    }

    /// Names of all cached topics
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        topics.sort();
        topics
    }

    /// All cached entries
    pub fn entries(&self) -> Vec<TopicEntry> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every cached topic (used on explicit disconnect)
    pub fn clear(&self) {
        let count = self.entries.len();
        self.entries.clear();
        info!(topics = count, "Topic state cleared");
    }
}

impl Default for TopicStateStore {
    fn default() -> Self {
        Self::new()
    }
}
