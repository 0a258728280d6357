// Threshold alarms: widget model, edge-triggered evaluator, record stores

mod evaluator;
mod model;
mod sqlite;
mod store;
mod validation;

pub use evaluator::{classify, AlarmEvaluator, Violation};
pub use model::{
    AlarmEvent, AlarmFilter, AlarmPatch, AlarmRecord, AlarmStatus, AlarmType, MonitoredWidget,
    ParseLabelError, Severity,
};
pub use sqlite::SqliteAlarmStore;
pub use store::{AlarmStore, MemoryAlarmStore, StoreError};
pub use validation::{validate_snapshot, validate_widget, WidgetValidationError};
