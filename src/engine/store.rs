//! Durable per-repository update records.
//!
//! Each record keeps the last attempted revision, the last successfully
//! merged partial configuration and the last faults of one config
//! repository, so the last known good configuration survives a restart.
//! Checkout faults and configuration faults are kept apart because they are
//! reported against different health scopes.
//!
//! [`FileRecordStore`] persists one JSON document per repository at
//! `<data_dir>/config-repos/<fingerprint>.json`, written to a `.tmp` file and
//! renamed into place.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::domain::PartialConfig;
use crate::error::{Error, Result};
use crate::material::Fingerprint;

/// Diagnostic of the most recent failed update attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedFault {
    pub message: String,
    pub description: String,
    pub at: DateTime<Utc>,
}

/// What is known about one config repository's updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryUpdateRecord {
    pub repository_key: Fingerprint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempted_revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_merged: Option<Arc<PartialConfig>>,
    /// Last parse or merge fault of the repository's configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fault: Option<RecordedFault>,
    /// Last failure to check out or update the working copy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checkout_fault: Option<RecordedFault>,
    pub updated_at: DateTime<Utc>,
}

impl RepositoryUpdateRecord {
    pub fn new(repository_key: Fingerprint) -> Self {
        Self {
            repository_key,
            last_attempted_revision: None,
            last_merged: None,
            last_fault: None,
            last_checkout_fault: None,
            updated_at: Utc::now(),
        }
    }
}

/// Storage for update records.
pub trait UpdateRecordStore: Send + Sync {
    fn load_all(&self) -> Result<Vec<RepositoryUpdateRecord>>;
    fn load(&self, key: &Fingerprint) -> Result<Option<RepositoryUpdateRecord>>;
    fn save(&self, record: &RepositoryUpdateRecord) -> Result<()>;
}

fn persistence(path: &Path, error: impl std::fmt::Display) -> Error {
    Error::Persistence {
        path: path.to_path_buf(),
        message: error.to_string(),
    }
}

/// Records stored as JSON files under a data directory.
#[derive(Debug, Clone)]
pub struct FileRecordStore {
    dir: PathBuf,
}

impl FileRecordStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join("config-repos"),
        }
    }

    pub fn record_path(&self, key: &Fingerprint) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    fn read(path: &Path) -> Result<RepositoryUpdateRecord> {
        let contents = fs::read_to_string(path).map_err(|e| persistence(path, e))?;
        serde_json::from_str(&contents).map_err(|e| persistence(path, e))
    }
}

impl UpdateRecordStore for FileRecordStore {
    fn load_all(&self) -> Result<Vec<RepositoryUpdateRecord>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.dir)
            .map_err(|e| persistence(&self.dir, e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            match Self::read(&path) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable update record: {}", e),
            }
        }
        debug!("Loaded {} update records from {}", records.len(), self.dir.display());
        Ok(records)
    }

    fn load(&self, key: &Fingerprint) -> Result<Option<RepositoryUpdateRecord>> {
        let path = self.record_path(key);
        if !path.exists() {
            return Ok(None);
        }
        Self::read(&path).map(Some)
    }

    fn save(&self, record: &RepositoryUpdateRecord) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| persistence(&self.dir, e))?;
        let path = self.record_path(&record.repository_key);
        let json = serde_json::to_string_pretty(record)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| persistence(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| persistence(&path, e))?;
        Ok(())
    }
}

/// Records kept in memory, for tests and one-shot runs.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<BTreeMap<Fingerprint, RepositoryUpdateRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<Fingerprint, RepositoryUpdateRecord>>> {
        self.records.lock().map_err(|_| Error::LockPoisoned {
            context: "memory record store".to_string(),
        })
    }
}

impl UpdateRecordStore for MemoryRecordStore {
    fn load_all(&self) -> Result<Vec<RepositoryUpdateRecord>> {
        Ok(self.lock()?.values().cloned().collect())
    }

    fn load(&self, key: &Fingerprint) -> Result<Option<RepositoryUpdateRecord>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn save(&self, record: &RepositoryUpdateRecord) -> Result<()> {
        self.lock()?
            .insert(record.repository_key.clone(), record.clone());
        Ok(())
    }
}
