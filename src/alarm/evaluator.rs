use crate::alarm::model::{
    AlarmEvent, AlarmFilter, AlarmPatch, AlarmRecord, AlarmStatus, AlarmType, MonitoredWidget,
    Severity,
};
use crate::alarm::store::{AlarmStore, StoreError};
use crate::extract::extract_number;
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Threshold violation found for one value
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Violation {
    pub alarm_type: AlarmType,
    /// The bound that was crossed
    pub threshold: f64,
}

/// Classify `value` against the widget's bounds.
///
/// HIGH wins when both bounds are violated (only possible with min > max).
pub fn classify(widget: &MonitoredWidget, value: f64) -> Option<Violation> {
    if let Some(max) = widget.alarm_max {
        if value > max {
            return Some(Violation {
                alarm_type: AlarmType::High,
                threshold: max,
            });
        }
    }
    if let Some(min) = widget.alarm_min {
        if value < min {
            return Some(Violation {
                alarm_type: AlarmType::Low,
                threshold: min,
            });
        }
    }
    None
}

enum Edge {
    Rising(Violation),
    Falling,
}

/// Converts level-triggered telemetry into edge-triggered alarm records.
///
/// The open set is the source of truth for duplicate suppression: a widget id
/// is in it iff the latest evaluated value for that widget violated a bound.
/// Store writes happen after the open set has changed and are never rolled
/// back on failure.
pub struct AlarmEvaluator {
    /// Current monitored snapshot (alarm-enabled widgets only)
    widgets: RwLock<Arc<Vec<MonitoredWidget>>>,

    /// Widget ids currently in alarm
    open: Mutex<HashSet<String>>,

    store: Arc<dyn AlarmStore>,

    /// Severity stamped on new records
    severity: Severity,

    /// Broadcast channel for alarm transitions
    events_tx: broadcast::Sender<AlarmEvent>,
}

impl AlarmEvaluator {
    pub fn new(store: Arc<dyn AlarmStore>, severity: Severity) -> Self {
        let (events_tx, _) = broadcast::channel(256);

        Self {
            widgets: RwLock::new(Arc::new(Vec::new())),
            open: Mutex::new(HashSet::new()),
            store,
            severity,
            events_tx,
        }
    }

    /// Replace the monitored widget snapshot.
    ///
    /// Widgets with alarms disabled are dropped. Open-set entries are left as
    /// they are: a widget that leaves and re-enters the snapshot while still
    /// violating does not raise a second record.
    pub fn set_widgets(&self, widgets: Vec<MonitoredWidget>) {
        let total = widgets.len();
        let monitored: Vec<MonitoredWidget> =
            widgets.into_iter().filter(|w| w.alarm_enabled).collect();

        for widget in &monitored {
            if let (Some(min), Some(max)) = (widget.alarm_min, widget.alarm_max) {
                if min > max {
                    warn!(
                        widget_id = %widget.id,
                        alarm_min = min,
                        alarm_max = max,
                        "Widget has inverted alarm bounds, HIGH takes priority"
                    );
                }
            }
        }

        info!(
            received = total,
            monitored = monitored.len(),
            "Monitored widget snapshot replaced"
        );

        *self.widgets.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(monitored);
    }

    /// Current monitored snapshot
    pub fn widgets(&self) -> Arc<Vec<MonitoredWidget>> {
        Arc::clone(&self.widgets.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Distinct topics referenced by monitored widgets
    pub fn topics(&self) -> BTreeSet<String> {
        self.widgets().iter().map(|w| w.topic.clone()).collect()
    }

    /// Evaluate every monitored widget bound to `topic` against `payload`
    pub fn evaluate_topic(&self, topic: &str, payload: &Value) -> Vec<AlarmEvent> {
        let widgets = self.widgets();
        widgets
            .iter()
            .filter(|w| w.topic == topic)
            .filter_map(|w| self.evaluate(w, payload))
            .collect()
    }

    /// Evaluate one widget against one payload.
    ///
    /// Returns the transition that happened, if any. Non-numeric or missing
    /// values leave the state untouched.
    pub fn evaluate(&self, widget: &MonitoredWidget, payload: &Value) -> Option<AlarmEvent> {
        let value = extract_number(payload, &widget.variable_name)?;
        let violation = classify(widget, value);

        let edge = {
            let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
            match (violation, open.contains(&widget.id)) {
                (Some(v), false) => {
                    open.insert(widget.id.clone());
                    Edge::Rising(v)
                }
                (None, true) => {
                    open.remove(&widget.id);
                    Edge::Falling
                }
                _ => return None,
            }
        };

        let event = match edge {
            Edge::Rising(v) => self.raise(widget, value, v),
            Edge::Falling => self.resolve(widget, value),
        };

        // No receivers is fine
        let _ = self.events_tx.send(event.clone());
        Some(event)
    }

    fn raise(&self, widget: &MonitoredWidget, value: f64, violation: Violation) -> AlarmEvent {
        let record = AlarmRecord::raised(
            widget,
            value,
            violation.threshold,
            violation.alarm_type,
            self.severity,
        );

        warn!(
            widget_id = %widget.id,
            widget = %widget.label(),
            variable = %widget.variable_name,
            value = value,
            threshold = violation.threshold,
            alarm_type = %violation.alarm_type,
            "Alarm raised"
        );

        if let Err(e) = self.store.insert(&record) {
            error!(
                error = %e,
                widget_id = %widget.id,
                alarm_id = %record.id,
                "Failed to persist alarm record"
            );
        }

        AlarmEvent::Raised { record }
    }

    fn resolve(&self, widget: &MonitoredWidget, value: f64) -> AlarmEvent {
        let resolved_at = Utc::now();
        let filter = AlarmFilter::default()
            .widget(&widget.id)
            .status(AlarmStatus::Active);

        match self.store.update(&filter, &AlarmPatch::resolved(resolved_at)) {
            Ok(touched) => info!(
                widget_id = %widget.id,
                widget = %widget.label(),
                value = value,
                records = touched,
                "Alarm resolved"
            ),
            Err(e) => error!(
                error = %e,
                widget_id = %widget.id,
                "Failed to persist alarm resolution"
            ),
        }

        AlarmEvent::Resolved {
            widget_id: widget.id.clone(),
            resolved_at,
        }
    }

    /// Mark one ACTIVE alarm as acknowledged. Does not touch the open set.
    pub fn acknowledge(&self, alarm_id: &str, by: &str) -> Result<usize, StoreError> {
        let filter = AlarmFilter::default()
            .id(alarm_id)
            .status(AlarmStatus::Active);
        let touched = self
            .store
            .update(&filter, &AlarmPatch::acknowledged(Utc::now(), by))?;
        debug!(alarm_id = %alarm_id, by = %by, records = touched, "Alarm acknowledged");
        Ok(touched)
    }

    /// Mark every ACTIVE alarm of an owner as acknowledged
    pub fn acknowledge_all(&self, owner_id: &str, by: &str) -> Result<usize, StoreError> {
        let filter = AlarmFilter::default()
            .owner(owner_id)
            .status(AlarmStatus::Active);
        let touched = self
            .store
            .update(&filter, &AlarmPatch::acknowledged(Utc::now(), by))?;
        info!(owner_id = %owner_id, by = %by, records = touched, "Alarms acknowledged");
        Ok(touched)
    }

    /// Widget ids currently in alarm, sorted
    pub fn open_alarms(&self) -> Vec<String> {
        let open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<String> = open.iter().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_open(&self, widget_id: &str) -> bool {
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(widget_id)
    }

    /// Subscribe to alarm transitions
    pub fn subscribe(&self) -> broadcast::Receiver<AlarmEvent> {
        self.events_tx.subscribe()
    }

    /// The backing record store
    pub fn store(&self) -> &Arc<dyn AlarmStore> {
        &self.store
    }
}
