//! In-process storage adapter.
//!
//! Implements [`StoragePort`] with plain collections behind a lock. The
//! configuration is kept serialised (JSON bytes) the way a key-value
//! backend would hold it, so a round-trip through the store exercises the
//! same encoding a persistent backend would.
//!
//! `set_available(false)` makes every call fail with
//! [`StorageError::Unavailable`], which is how tests drive the
//! persistence-failure paths.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::app::ports::StoragePort;
use crate::config::SystemConfig;
use crate::error::StorageError;
use crate::model::{ActuationRecord, LogEntry, Reading};

#[derive(Default)]
struct Tables {
    config: Option<Vec<u8>>,
    readings: Vec<Reading>,
    actuations: Vec<ActuationRecord>,
    logs: Vec<LogEntry>,
}

pub struct MemoryStore {
    tables: Mutex<Tables>,
    available: Mutex<bool>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            available: Mutex::new(true),
        }
    }

    /// Simulate the backend going away (or coming back).
    pub fn set_available(&self, available: bool) {
        *self.available.lock() = available;
    }

    pub fn readings(&self) -> Vec<Reading> {
        self.tables.lock().readings.clone()
    }

    pub fn actuations(&self) -> Vec<ActuationRecord> {
        self.tables.lock().actuations.clone()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.tables.lock().logs.clone()
    }

    fn tables(&self) -> Result<parking_lot::MutexGuard<'_, Tables>, StorageError> {
        if *self.available.lock() {
            Ok(self.tables.lock())
        } else {
            Err(StorageError::Unavailable)
        }
    }
}

impl StoragePort for MemoryStore {
    fn upsert_config(&self, config: &SystemConfig) -> Result<(), StorageError> {
        let bytes =
            serde_json::to_vec(config).map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.tables()?.config = Some(bytes);
        Ok(())
    }

    fn load_config(&self) -> Result<Option<SystemConfig>, StorageError> {
        let tables = self.tables()?;
        tables
            .config
            .as_deref()
            .map(|bytes| {
                serde_json::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
            })
            .transpose()
    }

    fn append_reading(&self, reading: &Reading) -> Result<(), StorageError> {
        self.tables()?.readings.push(reading.clone());
        Ok(())
    }

    fn append_actuation(&self, record: &ActuationRecord) -> Result<(), StorageError> {
        self.tables()?.actuations.push(record.clone());
        Ok(())
    }

    fn append_log(&self, entry: &LogEntry) -> Result<(), StorageError> {
        self.tables()?.logs.push(entry.clone());
        Ok(())
    }

    fn latest_readings(&self) -> Result<Vec<Reading>, StorageError> {
        let tables = self.tables()?;
        let mut latest = BTreeMap::new();
        for r in &tables.readings {
            let newer = latest
                .get(&r.channel)
                .is_none_or(|cur: &&Reading| r.timestamp >= cur.timestamp);
            if newer {
                latest.insert(r.channel, r);
            }
        }
        Ok(latest.into_values().cloned().collect())
    }

    fn logs_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<LogEntry>, StorageError> {
        Ok(self
            .tables()?
            .logs
            .iter()
            .filter(|e| e.timestamp < cutoff)
            .cloned()
            .collect())
    }

    fn delete_logs_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut tables = self.tables()?;
        let before = tables.logs.len();
        tables.logs.retain(|e| e.timestamp >= cutoff);
        Ok(before - tables.logs.len())
    }
}
