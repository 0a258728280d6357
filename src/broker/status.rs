use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tracing::debug;

/// Broker connection lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// Broker refused the session (bad credentials, protocol mismatch).
    /// Retries continue underneath.
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
        };
        f.write_str(label)
    }
}

pub type StatusCallback = Arc<dyn Fn(ConnectionStatus) + Send + Sync>;

struct Registry {
    current: ConnectionStatus,
    next_id: u64,
    callbacks: BTreeMap<u64, StatusCallback>,
}

/// Current connection status plus the callbacks observing it.
///
/// Callbacks run on the thread that changed the status, after the lock has
/// been released, so a callback may read the status or unsubscribe itself.
pub struct StatusSignal {
    inner: Mutex<Registry>,
}

impl StatusSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Registry {
                current: ConnectionStatus::Disconnected,
                next_id: 0,
                callbacks: BTreeMap::new(),
            }),
        })
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current(&self) -> ConnectionStatus {
        self.registry().current
    }

    /// Record a new status. Observers are notified only when it differs from
    /// the previous one; returns whether it did.
    pub fn set(&self, status: ConnectionStatus) -> bool {
        let callbacks: Vec<StatusCallback> = {
            let mut registry = self.registry();
            if registry.current == status {
                return false;
            }
            debug!(from = %registry.current, to = %status, "Connection status changed");
            registry.current = status;
            registry.callbacks.values().cloned().collect()
        };

        for callback in callbacks {
            callback(status);
        }
        true
    }

    /// Register `callback`; it is invoked right away with the current status
    pub fn subscribe(self: &Arc<Self>, callback: StatusCallback) -> StatusSubscription {
        let (id, current) = {
            let mut registry = self.registry();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.callbacks.insert(id, Arc::clone(&callback));
            (id, registry.current)
        };

        callback(current);

        StatusSubscription {
            id,
            signal: Arc::downgrade(self),
        }
    }

    pub fn observer_count(&self) -> usize {
        self.registry().callbacks.len()
    }

    fn remove(&self, id: u64) {
        self.registry().callbacks.remove(&id);
    }
}

/// Handle returned by `on_status_change`.
///
/// Dropping it keeps the callback registered; call `unsubscribe` to stop
/// receiving updates.
#[must_use = "keep the handle to be able to unsubscribe"]
pub struct StatusSubscription {
    id: u64,
    signal: Weak<StatusSignal>,
}

impl StatusSubscription {
    pub fn unsubscribe(self) {
        if let Some(signal) = self.signal.upgrade() {
            signal.remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<ConnectionStatus>>>, StatusCallback) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: StatusCallback = Arc::new(move |status| sink.lock().unwrap().push(status));
        (seen, callback)
    }

    #[test]
    fn test_subscribe_replays_current_status() {
        let signal = StatusSignal::new();
        signal.set(ConnectionStatus::Connecting);

        let (seen, callback) = recorder();
        let _handle = signal.subscribe(callback);

        assert_eq!(*seen.lock().unwrap(), vec![ConnectionStatus::Connecting]);
    }

    #[test]
    fn test_only_changes_are_announced() {
        let signal = StatusSignal::new();
        let (seen, callback) = recorder();
        let _handle = signal.subscribe(callback);

        assert!(signal.set(ConnectionStatus::Connecting));
        assert!(!signal.set(ConnectionStatus::Connecting));
        assert!(signal.set(ConnectionStatus::Connected));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ConnectionStatus::Disconnected,
                ConnectionStatus::Connecting,
                ConnectionStatus::Connected,
            ]
        );
    }

    #[test]
    fn test_unsubscribe_stops_updates() {
        let signal = StatusSignal::new();
        let (seen, callback) = recorder();
        let handle = signal.subscribe(callback);
        assert_eq!(signal.observer_count(), 1);

        handle.unsubscribe();
        signal.set(ConnectionStatus::Error);

        assert_eq!(signal.observer_count(), 0);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_callback_may_read_status() {
        let signal = StatusSignal::new();
        let observed = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&observed);
        let reader = Arc::clone(&signal);
        let _handle = signal.subscribe(Arc::new(move |_| {
            sink.lock().unwrap().push(reader.current());
        }));
        signal.set(ConnectionStatus::Connected);

        assert_eq!(
            *observed.lock().unwrap(),
            vec![ConnectionStatus::Disconnected, ConnectionStatus::Connected]
        );
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(ConnectionStatus::Connecting).unwrap(),
            "connecting"
        );
        assert_eq!(ConnectionStatus::Error.to_string(), "error");
    }
}
