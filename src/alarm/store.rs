//! Alarm record persistence.
//!
//! The engine only needs `insert` and `update`; `select` and `delete` back the
//! history and housekeeping endpoints. Stores are synchronous and are called
//! inline from the broker event loop, so implementations must keep each call
//! short.

use crate::alarm::model::{AlarmFilter, AlarmPatch, AlarmRecord};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("duplicate alarm id '{0}'")]
    DuplicateId(String),

    #[error("alarm store unavailable: {0}")]
    Unavailable(String),
}

/// Opaque record store keyed by alarm id and filters
pub trait AlarmStore: Send + Sync {
    fn insert(&self, record: &AlarmRecord) -> Result<(), StoreError>;

    /// Apply `patch` to every record matching `filter`; returns rows touched
    fn update(&self, filter: &AlarmFilter, patch: &AlarmPatch) -> Result<usize, StoreError>;

    /// Matching records, newest first
    fn select(&self, filter: &AlarmFilter) -> Result<Vec<AlarmRecord>, StoreError>;

    /// Remove matching records; returns rows removed
    fn delete(&self, filter: &AlarmFilter) -> Result<usize, StoreError>;
}

/// Process-local store, used in tests and when no database is configured
#[derive(Default)]
pub struct MemoryAlarmStore {
    records: Mutex<Vec<AlarmRecord>>,
}

impl MemoryAlarmStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> std::sync::MutexGuard<'_, Vec<AlarmRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AlarmStore for MemoryAlarmStore {
    fn insert(&self, record: &AlarmRecord) -> Result<(), StoreError> {
        let mut records = self.records();
        if records.iter().any(|r| r.id == record.id) {
            return Err(StoreError::DuplicateId(record.id.clone()));
        }
        records.push(record.clone());
        Ok(())
    }

    fn update(&self, filter: &AlarmFilter, patch: &AlarmPatch) -> Result<usize, StoreError> {
        let mut touched = 0;
        for record in self.records().iter_mut().filter(|r| filter.matches(r)) {
            patch.apply(record);
            touched += 1;
        }
        Ok(touched)
    }

    fn select(&self, filter: &AlarmFilter) -> Result<Vec<AlarmRecord>, StoreError> {
        let mut selected: Vec<AlarmRecord> = self
            .records()
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        selected.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(selected)
    }

    fn delete(&self, filter: &AlarmFilter) -> Result<usize, StoreError> {
        let mut records = self.records();
        let before = records.len();
        records.retain(|r| !filter.matches(r));
        Ok(before - records.len())
    }
}
