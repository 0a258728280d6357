use futures::Stream;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;

type Senders = HashMap<u64, mpsc::UnboundedSender<Value>>;

/// Called with a topic once its last consumer is gone
pub type ReleaseHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Consumers per topic. Several consumers may watch the same topic; each gets
/// its own copy of every payload.
#[derive(Default)]
pub(crate) struct SubscriberRegistry {
    topics: Mutex<HashMap<String, Senders>>,
    next_id: AtomicU64,
    on_release: RwLock<Option<ReleaseHook>>,
}

impl SubscriberRegistry {
    fn topics(&self) -> std::sync::MutexGuard<'_, HashMap<String, Senders>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn register(self: &Arc<Self>, topic: &str) -> TopicSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        self.topics()
            .entry(topic.to_string())
            .or_default()
            .insert(id, tx);

        TopicSubscription {
            topic: topic.to_string(),
            id,
            rx,
            registry: Arc::downgrade(self),
        }
    }

    pub(crate) fn set_release_hook(&self, hook: ReleaseHook) {
        *self.on_release.write().unwrap_or_else(PoisonError::into_inner) = Some(hook);
    }

    /// Drop one consumer. The release hook runs, outside the lock, when it
    /// was the last one on `topic`.
    pub(crate) fn remove(&self, topic: &str, id: u64) {
        let released = {
            let mut topics = self.topics();
            match topics.get_mut(topic) {
                Some(senders) => {
                    senders.remove(&id);
                    let empty = senders.is_empty();
                    if empty {
                        topics.remove(topic);
                    }
                    empty
                }
                None => false,
            }
        };

        if released {
            let hook = self
                .on_release
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(hook) = hook {
                hook(topic);
            }
        }
    }

    /// Senders for `topic`, cloned out so delivery happens without the lock
    pub(crate) fn senders(&self, topic: &str) -> Vec<(u64, mpsc::UnboundedSender<Value>)> {
        self.topics()
            .get(topic)
            .map(|senders| senders.iter().map(|(id, tx)| (*id, tx.clone())).collect())
            .unwrap_or_default()
    }

    pub(crate) fn topic_names(&self) -> BTreeSet<String> {
        self.topics().keys().cloned().collect()
    }

    pub(crate) fn count(&self, topic: &str) -> usize {
        self.topics().get(topic).map_or(0, |senders| senders.len())
    }
}

/// Stream of decoded payloads for one topic.
///
/// Dropping the subscription removes it from the router.
pub struct TopicSubscription {
    topic: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<Value>,
    registry: Weak<SubscriberRegistry>,
}

impl TopicSubscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next payload; `None` once the router is gone
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }

    /// Next payload if one is already queued
    pub fn try_recv(&mut self) -> Option<Value> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Stream for TopicSubscription {
    type Item = Value;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Value>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for TopicSubscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.topic, self.id);
        }
    }
}
