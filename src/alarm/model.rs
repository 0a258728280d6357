use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// A dashboard widget whose variable is watched for threshold violations.
///
/// Supplied by the dashboard layer as a whole snapshot; never patched in place.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoredWidget {
    pub id: String,

    /// Display name, only used in logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Exact broker topic the variable arrives on
    pub topic: String,

    /// Dotted/indexed path into the topic payload
    #[serde(alias = "variable_name")]
    pub variable_name: String,

    #[serde(default, alias = "alarm_min")]
    pub alarm_min: Option<f64>,

    #[serde(default, alias = "alarm_max")]
    pub alarm_max: Option<f64>,

    #[serde(alias = "owner_id")]
    pub owner_id: String,

    #[serde(default = "default_alarm_enabled", alias = "alarm_enabled")]
    pub alarm_enabled: bool,
}

fn default_alarm_enabled() -> bool {
    true
}

impl MonitoredWidget {
    /// Name for log lines (falls back to the id)
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Which bound was violated
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmType {
    Low,
    High,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Medium
    }
}

/// Persisted alarm lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmStatus {
    Active,
    Acknowledged,
    Resolved,
}

/// Unknown enum label read back from storage or a query string
#[derive(Debug, Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseLabelError {
    kind: &'static str,
    value: String,
}

macro_rules! labelled_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $label:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $label),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ParseLabelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_uppercase().as_str() {
                    $($label => Ok($ty::$variant),)+
                    _ => Err(ParseLabelError {
                        kind: $kind,
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

labelled_enum!(AlarmType, "alarm type", { Low => "LOW", High => "HIGH" });
labelled_enum!(Severity, "severity", {
    Low => "LOW",
    Medium => "MEDIUM",
    High => "HIGH",
    Critical => "CRITICAL",
});
labelled_enum!(AlarmStatus, "alarm status", {
    Active => "ACTIVE",
    Acknowledged => "ACKNOWLEDGED",
    Resolved => "RESOLVED",
});

/// Alarm record as stored by the alarm store
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmRecord {
    /// UUIDv7 identifier (time-ordered)
    pub id: String,
    pub owner_id: String,
    pub widget_id: String,
    pub variable_name: String,

    /// Value that crossed the bound
    pub trigger_value: f64,

    /// The bound that was crossed
    pub threshold_value: f64,

    pub alarm_type: AlarmType,
    pub severity: Severity,
    pub status: AlarmStatus,
    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_by: Option<String>,
}

impl AlarmRecord {
    /// New ACTIVE record for a rising edge on `widget`
    pub fn raised(
        widget: &MonitoredWidget,
        trigger_value: f64,
        threshold_value: f64,
        alarm_type: AlarmType,
        severity: Severity,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            owner_id: widget.owner_id.clone(),
            widget_id: widget.id.clone(),
            variable_name: widget.variable_name.clone(),
            trigger_value,
            threshold_value,
            alarm_type,
            severity,
            status: AlarmStatus::Active,
            created_at: Utc::now(),
            resolved_at: None,
            acknowledged_at: None,
            acknowledged_by: None,
        }
    }
}

/// Record selector for store updates, selects and deletes.
///
/// Unset fields match everything; set fields are ANDed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmFilter {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub widget_id: Option<String>,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub status: Option<AlarmStatus>,
}

impl AlarmFilter {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn widget(mut self, widget_id: impl Into<String>) -> Self {
        self.widget_id = Some(widget_id.into());
        self
    }

    pub fn owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn status(mut self, status: AlarmStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, record: &AlarmRecord) -> bool {
        self.id.as_ref().map_or(true, |id| *id == record.id)
            && self
                .widget_id
                .as_ref()
                .map_or(true, |id| *id == record.widget_id)
            && self
                .owner_id
                .as_ref()
                .map_or(true, |id| *id == record.owner_id)
            && self.status.map_or(true, |status| status == record.status)
    }
}

/// Partial update applied to every record a filter selects
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AlarmPatch {
    pub status: Option<AlarmStatus>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
}

impl AlarmPatch {
    pub fn resolved(at: DateTime<Utc>) -> Self {
        Self {
            status: Some(AlarmStatus::Resolved),
            resolved_at: Some(at),
            ..Default::default()
        }
    }

    pub fn acknowledged(at: DateTime<Utc>, by: impl Into<String>) -> Self {
        Self {
            status: Some(AlarmStatus::Acknowledged),
            acknowledged_at: Some(at),
            acknowledged_by: Some(by.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.resolved_at.is_none()
            && self.acknowledged_at.is_none()
            && self.acknowledged_by.is_none()
    }

    pub fn apply(&self, record: &mut AlarmRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(at) = self.resolved_at {
            record.resolved_at = Some(at);
        }
        if let Some(at) = self.acknowledged_at {
            record.acknowledged_at = Some(at);
        }
        if let Some(by) = &self.acknowledged_by {
            record.acknowledged_by = Some(by.clone());
        }
    }
}

/// Alarm transition broadcast to observers (dashboards, logs)
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AlarmEvent {
    /// Rising edge: a new ACTIVE record was opened
    Raised { record: AlarmRecord },

    /// Falling edge: the widget's condition cleared
    Resolved {
        #[serde(rename = "widgetId")]
        widget_id: String,
        #[serde(rename = "resolvedAt")]
        resolved_at: DateTime<Utc>,
    },
}

impl AlarmEvent {
    pub fn widget_id(&self) -> &str {
        match self {
            AlarmEvent::Raised { record } => &record.widget_id,
            AlarmEvent::Resolved { widget_id, .. } => widget_id,
        }
    }
}
