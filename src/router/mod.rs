// Inbound message routing: decode, cache, evaluate alarms, fan out

mod subscription;

pub use subscription::{ReleaseHook, TopicSubscription};

use crate::alarm::AlarmEvaluator;
use crate::state::{EntryOrigin, TopicStateStore};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use subscription::SubscriberRegistry;
use tracing::{debug, warn};

/// Router counters since start
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterStats {
    pub frames_received: u64,
    /// Frames whose payload was not valid JSON
    pub frames_dropped: u64,
    /// Payload copies handed to consumers
    pub payloads_delivered: u64,
}

/// Demultiplexes broker frames by topic.
///
/// Per frame: decode, overwrite the topic state, evaluate alarms for widgets
/// on that topic, then deliver to every consumer of that topic.
pub struct MessageRouter {
    state: Arc<TopicStateStore>,
    evaluator: Arc<AlarmEvaluator>,
    subscribers: Arc<SubscriberRegistry>,
    frames_received: AtomicU64,
    frames_dropped: AtomicU64,
    payloads_delivered: AtomicU64,
}

impl MessageRouter {
    pub fn new(state: Arc<TopicStateStore>, evaluator: Arc<AlarmEvaluator>) -> Self {
        Self {
            state,
            evaluator,
            subscribers: Arc::new(SubscriberRegistry::default()),
            frames_received: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            payloads_delivered: AtomicU64::new(0),
        }
    }

    /// Register a consumer for `topic`
    pub fn subscribe(&self, topic: &str) -> TopicSubscription {
        debug!(topic = %topic, "Consumer subscribed");
        self.subscribers.register(topic)
    }

    /// Process one inbound frame. Returns false when the frame was dropped.
    pub fn handle_frame(&self, topic: &str, bytes: &[u8]) -> bool {
        self.frames_received.fetch_add(1, Ordering::Relaxed);

        let payload: Value = match serde_json::from_slice(bytes) {
            Ok(payload) => payload,
            Err(e) => {
                self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    topic = %topic,
                    bytes = bytes.len(),
                    error = %e,
                    "Dropping malformed payload"
                );
                return false;
            }
        };

        self.state.set(topic, payload.clone(), EntryOrigin::Inbound);
        self.evaluator.evaluate_topic(topic, &payload);
        self.deliver(topic, &payload);
        true
    }

    fn deliver(&self, topic: &str, payload: &Value) {
        let mut closed = Vec::new();
        let mut delivered = 0;

        for (id, tx) in self.subscribers.senders(topic) {
            if tx.send(payload.clone()).is_ok() {
                delivered += 1;
            } else {
                closed.push(id);
            }
        }

        for id in closed {
            self.subscribers.remove(topic, id);
        }

        self.payloads_delivered.fetch_add(delivered, Ordering::Relaxed);
    }

    /// Topics with at least one live consumer
    pub fn consumer_topics(&self) -> BTreeSet<String> {
        self.subscribers.topic_names()
    }

    /// Topics the router needs frames for: monitored widget topics plus
    /// topics with a live consumer
    pub fn wanted_topics(&self) -> BTreeSet<String> {
        let mut topics = self.evaluator.topics();
        topics.extend(self.subscribers.topic_names());
        topics
    }

    /// Run `hook` whenever the last consumer of a topic goes away
    pub fn on_topic_released<F>(&self, hook: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.subscribers.set_release_hook(Arc::new(hook));
    }

    pub fn consumer_count(&self, topic: &str) -> usize {
        self.subscribers.count(topic)
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            payloads_delivered: self.payloads_delivered.load(Ordering::Relaxed),
        }
    }
}
