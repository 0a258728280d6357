use super::model::MonitoredWidget;
use crate::extract::is_valid_path;
use std::collections::HashSet;
use std::fmt;

/// Validation errors for a monitored widget snapshot
#[derive(Debug, Clone, PartialEq)]
pub enum WidgetValidationError {
    MissingId,
    MissingOwner(String),
    MissingTopic(String),
    WildcardTopic(String),
    InvalidVariablePath { widget_id: String, path: String },
    NonFiniteBound(String),
    DuplicateId(String),
}

impl fmt::Display for WidgetValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WidgetValidationError::MissingId => write!(f, "widget id is required"),
            WidgetValidationError::MissingOwner(id) => {
                write!(f, "widget '{}': ownerId is required", id)
            }
            WidgetValidationError::MissingTopic(id) => {
                write!(f, "widget '{}': topic is required", id)
            }
            WidgetValidationError::WildcardTopic(id) => {
                write!(f, "widget '{}': topic must not contain '+' or '#'", id)
            }
            WidgetValidationError::InvalidVariablePath { widget_id, path } => {
                write!(f, "widget '{}': invalid variable path '{}'", widget_id, path)
            }
            WidgetValidationError::NonFiniteBound(id) => {
                write!(f, "widget '{}': alarm bounds must be finite numbers", id)
            }
            WidgetValidationError::DuplicateId(id) => {
                write!(f, "duplicate widget id '{}'", id)
            }
        }
    }
}

impl std::error::Error for WidgetValidationError {}

/// Validates one widget.
///
/// Rules:
/// - id, ownerId and topic are required
/// - topic is an exact name (no `+` / `#` filters)
/// - variableName follows the path grammar (`a.b`, `a[0].b`)
/// - alarmMin / alarmMax, when present, are finite
///
/// Inverted bounds (min > max) are accepted; the evaluator gives HIGH priority.
pub fn validate_widget(widget: &MonitoredWidget) -> Result<(), WidgetValidationError> {
    if widget.id.trim().is_empty() {
        return Err(WidgetValidationError::MissingId);
    }
    if widget.owner_id.trim().is_empty() {
        return Err(WidgetValidationError::MissingOwner(widget.id.clone()));
    }
    if widget.topic.trim().is_empty() {
        return Err(WidgetValidationError::MissingTopic(widget.id.clone()));
    }
    if widget.topic.contains(|c: char| c == '+' || c == '#') {
        return Err(WidgetValidationError::WildcardTopic(widget.id.clone()));
    }
    if !is_valid_path(&widget.variable_name) {
        return Err(WidgetValidationError::InvalidVariablePath {
            widget_id: widget.id.clone(),
            path: widget.variable_name.clone(),
        });
    }

    let bounds = [widget.alarm_min, widget.alarm_max];
    if bounds.iter().flatten().any(|bound| !bound.is_finite()) {
        return Err(WidgetValidationError::NonFiniteBound(widget.id.clone()));
    }

    Ok(())
}

/// Validates a whole snapshot: every widget, plus id uniqueness
pub fn validate_snapshot(widgets: &[MonitoredWidget]) -> Result<(), WidgetValidationError> {
    let mut seen = HashSet::new();
    for widget in widgets {
        validate_widget(widget)?;
        if !seen.insert(widget.id.as_str()) {
            return Err(WidgetValidationError::DuplicateId(widget.id.clone()));
        }
    }
    Ok(())
}
