//! Alarm records in SQLite.

use crate::alarm::model::{AlarmFilter, AlarmPatch, AlarmRecord};
use crate::alarm::store::{AlarmStore, StoreError};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value as SqlValue};
use rusqlite::{params, params_from_iter, Connection, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use tracing::info;

const COLUMNS: &str = "id, owner_id, widget_id, variable_name, trigger_value, threshold_value, \
     alarm_type, severity, status, created_at, resolved_at, acknowledged_at, acknowledged_by";

/// Alarm store backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE alarms (
///     id TEXT PRIMARY KEY,            -- UUIDv7
///     owner_id TEXT NOT NULL,
///     widget_id TEXT NOT NULL,
///     variable_name TEXT NOT NULL,
///     trigger_value REAL NOT NULL,
///     threshold_value REAL NOT NULL,
///     alarm_type TEXT NOT NULL,       -- LOW | HIGH
///     severity TEXT NOT NULL,         -- LOW | MEDIUM | HIGH | CRITICAL
///     status TEXT NOT NULL,           -- ACTIVE | ACKNOWLEDGED | RESOLVED
///     created_at TEXT NOT NULL,       -- RFC 3339
///     resolved_at TEXT,
///     acknowledged_at TEXT,
///     acknowledged_by TEXT
/// );
/// ```
pub struct SqliteAlarmStore {
    conn: Mutex<Connection>,
}

impl SqliteAlarmStore {
    /// Creates or opens the alarm database at `db_path` (`:memory:` works too)
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open alarm database {}", path.display()))?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS alarms (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                widget_id TEXT NOT NULL,
                variable_name TEXT NOT NULL,
                trigger_value REAL NOT NULL,
                threshold_value REAL NOT NULL,
                alarm_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                resolved_at TEXT,
                acknowledged_at TEXT,
                acknowledged_by TEXT
            )
            "#,
            [],
        )
        .context("Failed to create alarms table")?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_alarms_widget_status ON alarms(widget_id, status)",
            [],
        )
        .context("Failed to create index")?;

        info!(path = %path.display(), "Alarm store opened");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Build ` WHERE ...` (or an empty string) and its positional parameters
fn where_clause(filter: &AlarmFilter) -> (String, Vec<SqlValue>) {
    let mut conditions = Vec::new();
    let mut values = Vec::new();

    let columns = [
        ("id", filter.id.clone()),
        ("widget_id", filter.widget_id.clone()),
        ("owner_id", filter.owner_id.clone()),
        ("status", filter.status.map(|s| s.as_str().to_string())),
    ];
    for (column, value) in columns {
        if let Some(value) = value {
            conditions.push(format!("{column} = ?"));
            values.push(SqlValue::Text(value));
        }
    }

    if conditions.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", conditions.join(" AND ")), values)
    }
}

fn text_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn read_record(row: &Row<'_>) -> rusqlite::Result<AlarmRecord> {
    let created_at = time_column(row, 9)?.ok_or(rusqlite::Error::InvalidColumnType(
        9,
        "created_at".to_string(),
        Type::Null,
    ))?;

    Ok(AlarmRecord {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        widget_id: row.get(2)?,
        variable_name: row.get(3)?,
        trigger_value: row.get(4)?,
        threshold_value: row.get(5)?,
        alarm_type: text_column(row, 6)?,
        severity: text_column(row, 7)?,
        status: text_column(row, 8)?,
        created_at,
        resolved_at: time_column(row, 10)?,
        acknowledged_at: time_column(row, 11)?,
        acknowledged_by: row.get(12)?,
    })
}

impl AlarmStore for SqliteAlarmStore {
    fn insert(&self, record: &AlarmRecord) -> Result<(), StoreError> {
        let result = self.conn().execute(
            &format!(
                "INSERT INTO alarms ({COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
            ),
            params![
                record.id,
                record.owner_id,
                record.widget_id,
                record.variable_name,
                record.trigger_value,
                record.threshold_value,
                record.alarm_type.as_str(),
                record.severity.as_str(),
                record.status.as_str(),
                record.created_at.to_rfc3339(),
                record.resolved_at.map(|dt| dt.to_rfc3339()),
                record.acknowledged_at.map(|dt| dt.to_rfc3339()),
                record.acknowledged_by,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::DuplicateId(record.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn update(&self, filter: &AlarmFilter, patch: &AlarmPatch) -> Result<usize, StoreError> {
        if patch.is_empty() {
            return Ok(0);
        }

        let mut assignments = Vec::new();
        let mut values = Vec::new();

        let columns = [
            ("status", patch.status.map(|s| s.as_str().to_string())),
            ("resolved_at", patch.resolved_at.map(|dt| dt.to_rfc3339())),
            ("acknowledged_at", patch.acknowledged_at.map(|dt| dt.to_rfc3339())),
            ("acknowledged_by", patch.acknowledged_by.clone()),
        ];
        for (column, value) in columns {
            if let Some(value) = value {
                assignments.push(format!("{column} = ?"));
                values.push(SqlValue::Text(value));
            }
        }

        let (where_sql, where_values) = where_clause(filter);
        values.extend(where_values);

        let sql = format!("UPDATE alarms SET {}{}", assignments.join(", "), where_sql);
        let touched = self.conn().execute(&sql, params_from_iter(values.iter()))?;
        Ok(touched)
    }

    fn select(&self, filter: &AlarmFilter) -> Result<Vec<AlarmRecord>, StoreError> {
        let (where_sql, values) = where_clause(filter);
        let sql = format!(
            "SELECT {COLUMNS} FROM alarms{where_sql} ORDER BY created_at DESC, id DESC"
        );

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(values.iter()), read_record)?
            .collect::<rusqlite::Result<Vec<AlarmRecord>>>()?;
        Ok(records)
    }

    fn delete(&self, filter: &AlarmFilter) -> Result<usize, StoreError> {
        let (where_sql, values) = where_clause(filter);
        let sql = format!("DELETE FROM alarms{where_sql}");
        let removed = self.conn().execute(&sql, params_from_iter(values.iter()))?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::model::{AlarmStatus, AlarmType, MonitoredWidget, Severity};

    fn create_test_store() -> SqliteAlarmStore {
        SqliteAlarmStore::open(":memory:").expect("Failed to create test store")
    }

    fn widget(id: &str, owner: &str) -> MonitoredWidget {
        MonitoredWidget {
            id: id.to_string(),
            name: None,
            topic: "unit/1".to_string(),
            variable_name: "temperature".to_string(),
            alarm_min: Some(-10.0),
            alarm_max: Some(0.0),
            owner_id: owner.to_string(),
            alarm_enabled: true,
        }
    }

    fn record(id: &str, owner: &str) -> AlarmRecord {
        AlarmRecord::raised(&widget(id, owner), 3.5, 0.0, AlarmType::High, Severity::Medium)
    }

    #[test]
    fn test_insert_and_select() {
        let store = create_test_store();
        let rec = record("w1", "user1");

        store.insert(&rec).expect("Failed to insert");

        let selected = store.select(&AlarmFilter::default()).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, rec.id);
        assert_eq!(selected[0].alarm_type, AlarmType::High);
        assert_eq!(selected[0].status, AlarmStatus::Active);
        assert_eq!(selected[0].trigger_value, 3.5);
        assert!(selected[0].resolved_at.is_none());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let store = create_test_store();
        let rec = record("w1", "user1");

        store.insert(&rec).unwrap();
        let result = store.insert(&rec);
        assert!(matches!(result, Err(StoreError::DuplicateId(_))));
    }

    #[test]
    fn test_update_matches_filter_only() {
        let store = create_test_store();
        store.insert(&record("w1", "user1")).unwrap();
        store.insert(&record("w2", "user1")).unwrap();

        let now = Utc::now();
        let touched = store
            .update(
                &AlarmFilter::default().widget("w1").status(AlarmStatus::Active),
                &AlarmPatch::resolved(now),
            )
            .unwrap();
        assert_eq!(touched, 1);

        let w1 = store.select(&AlarmFilter::default().widget("w1")).unwrap();
        assert_eq!(w1[0].status, AlarmStatus::Resolved);
        assert!(w1[0].resolved_at.is_some());

        let w2 = store.select(&AlarmFilter::default().widget("w2")).unwrap();
        assert_eq!(w2[0].status, AlarmStatus::Active);

        // Already resolved; a second resolve touches nothing
        let touched = store
            .update(
                &AlarmFilter::default().widget("w1").status(AlarmStatus::Active),
                &AlarmPatch::resolved(now),
            )
            .unwrap();
        assert_eq!(touched, 0);
    }

    #[test]
    fn test_acknowledge_patch_sets_who_and_when() {
        let store = create_test_store();
        let rec = record("w1", "user1");
        store.insert(&rec).unwrap();

        store
            .update(
                &AlarmFilter::default().id(&rec.id),
                &AlarmPatch::acknowledged(Utc::now(), "operator-7"),
            )
            .unwrap();

        let selected = store.select(&AlarmFilter::default().id(&rec.id)).unwrap();
        assert_eq!(selected[0].status, AlarmStatus::Acknowledged);
        assert_eq!(selected[0].acknowledged_by.as_deref(), Some("operator-7"));
        assert!(selected[0].acknowledged_at.is_some());
    }

    #[test]
    fn test_empty_patch_is_noop() {
        let store = create_test_store();
        store.insert(&record("w1", "user1")).unwrap();

        let touched = store
            .update(&AlarmFilter::default(), &AlarmPatch::default())
            .unwrap();
        assert_eq!(touched, 0);
    }

    #[test]
    fn test_delete_by_owner() {
        let store = create_test_store();
        store.insert(&record("w1", "user1")).unwrap();
        store.insert(&record("w2", "user1")).unwrap();
        store.insert(&record("w3", "user2")).unwrap();

        let removed = store.delete(&AlarmFilter::default().owner("user1")).unwrap();
        assert_eq!(removed, 2);

        let left = store.select(&AlarmFilter::default()).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].owner_id, "user2");
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alarms.db");
        let rec = record("w1", "user1");

        {
            let store = SqliteAlarmStore::open(&path).unwrap();
            store.insert(&rec).unwrap();
        }

        let store = SqliteAlarmStore::open(&path).unwrap();
        let selected = store.select(&AlarmFilter::default()).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, rec.id);
        assert_eq!(selected[0].created_at, rec.created_at);
    }
}
