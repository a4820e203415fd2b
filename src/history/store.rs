//! # History Store
//!
//! Process-wide record of finished recording sessions.
//!
//! ## Guarantees:
//! - Entries are immutable once recorded; ids strictly increase and are never reused
//! - `record` is visible to the next `list_recent` as soon as it returns
//! - Every mutation happens under one write lock, so concurrent sessions
//!   finishing together never lose an entry
//! - With persistence enabled, an entry is on disk before it becomes visible,
//!   and the id counter is persisted too, so a restart never hands out an
//!   id that was used before a `clear`
//! - `clear` commits with a single meta write; leftover files from an
//!   interrupted cleanup are ignored and removed on the next open
//!
//! A failing disk or a poisoned lock is reported as [`StoreError::Unavailable`]
//! instead of being papered over.

use super::disk::{DiskHistory, DiskMeta};
use crate::config::HistoryConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Summary of one completed session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: u64,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    Unavailable(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable(msg) => write!(f, "history store unavailable: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Unavailable(format!("corrupt history entry: {}", err))
    }
}

#[derive(Debug, Default)]
struct Entries {
    by_id: BTreeMap<u64, HistoryEntry>,
    next_id: u64,
    cleared_through: u64,
}

impl Entries {
    fn meta(&self) -> DiskMeta {
        DiskMeta {
            next_id: self.next_id,
            cleared_through: self.cleared_through,
        }
    }
}

#[derive(Debug)]
pub struct HistoryStore {
    entries: RwLock<Entries>,
    disk: Option<DiskHistory>,
    /// Retention cap; 0 keeps everything
    max_entries: usize,
}

impl HistoryStore {
    /// Volatile store; everything is lost on restart.
    pub fn in_memory(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(Entries {
                by_id: BTreeMap::new(),
                next_id: 1,
                cleared_through: 0,
            }),
            disk: None,
            max_entries,
        }
    }

    /// Store backed by JSON files in `disk`, pre-loaded with what is already there.
    pub fn persistent(disk: DiskHistory, max_entries: usize) -> Result<Self, StoreError> {
        let meta = disk.read_meta()?;
        let dir = disk.dir().to_path_buf();

        let (stale, live): (Vec<HistoryEntry>, Vec<HistoryEntry>) = disk
            .load()?
            .into_iter()
            .partition(|entry| entry.id <= meta.cleared_through);
        for entry in stale {
            if let Err(err) = disk.remove(entry.id) {
                warn!(id = entry.id, error = %err, "Failed to delete cleared history file");
            }
        }

        let next_id = live
            .last()
            .map(|entry| entry.id + 1)
            .unwrap_or(1)
            .max(meta.next_id)
            .max(meta.cleared_through + 1);
        let by_id = live.into_iter().map(|entry| (entry.id, entry)).collect();

        let store = Self {
            entries: RwLock::new(Entries {
                by_id,
                next_id,
                cleared_through: meta.cleared_through,
            }),
            disk: Some(disk),
            max_entries,
        };

        {
            let mut entries = store.write()?;
            store.prune(&mut entries);
            info!(
                dir = %dir.display(),
                entries = entries.by_id.len(),
                next_id = entries.next_id,
                "Loaded history from disk"
            );
        }

        Ok(store)
    }

    pub fn from_config(config: &HistoryConfig) -> Result<Self, StoreError> {
        match &config.directory {
            Some(dir) => Self::persistent(DiskHistory::open(dir)?, config.max_entries),
            None => Ok(Self::in_memory(config.max_entries)),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Entries>, StoreError> {
        self.entries
            .read()
            .map_err(|_| StoreError::Unavailable("history lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Entries>, StoreError> {
        self.entries
            .write()
            .map_err(|_| StoreError::Unavailable("history lock poisoned".to_string()))
    }

    pub fn is_persistent(&self) -> bool {
        self.disk.is_some()
    }

    /// Append a new entry stamped with the current time and return its id.
    pub fn record(&self, text: impl Into<String>) -> Result<u64, StoreError> {
        let mut entries = self.write()?;

        let entry = HistoryEntry {
            id: entries.next_id,
            text: text.into(),
            created_at: Utc::now(),
        };

        if let Some(disk) = &self.disk {
            disk.write(&entry)?;
            let meta = DiskMeta {
                next_id: entry.id + 1,
                ..entries.meta()
            };
            if let Err(err) = disk.write_meta(&meta) {
                if let Err(cleanup) = disk.remove(entry.id) {
                    warn!(id = entry.id, error = %cleanup, "Failed to roll back history file");
                }
                return Err(err);
            }
        }

        let id = entry.id;
        entries.next_id += 1;
        entries.by_id.insert(id, entry);
        self.prune(&mut entries);

        debug!(id, total = entries.by_id.len(), "Recorded history entry");
        Ok(id)
    }

    /// Drop the oldest entries beyond the retention cap.
    fn prune(&self, entries: &mut Entries) {
        if self.max_entries == 0 {
            return;
        }

        while entries.by_id.len() > self.max_entries {
            let Some((&oldest, _)) = entries.by_id.iter().next() else {
                break;
            };
            entries.by_id.remove(&oldest);

            if let Some(disk) = &self.disk {
                if let Err(err) = disk.remove(oldest) {
                    warn!(id = oldest, error = %err, "Failed to delete pruned history file");
                }
            }
        }
    }

    /// The `n` most recent entries, oldest first and most recent last.
    pub fn recent_entries(&self, n: usize) -> Result<Vec<HistoryEntry>, StoreError> {
        let entries = self.read()?;
        let mut recent: Vec<HistoryEntry> = entries.by_id.values().rev().take(n).cloned().collect();
        recent.reverse();
        Ok(recent)
    }

    /// Display strings of the `n` most recent entries, oldest first.
    pub fn list_recent(&self, n: usize) -> Result<Vec<String>, StoreError> {
        Ok(self
            .recent_entries(n)?
            .into_iter()
            .map(|entry| entry.text)
            .collect())
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.by_id.len())
    }

    /// Remove every entry and return how many were removed.
    ///
    /// All or nothing: with persistence the clear is committed by raising
    /// `cleared_through` in the meta file. If that write fails nothing
    /// changes. File deletion afterwards is best effort.
    pub fn clear(&self) -> Result<usize, StoreError> {
        let mut entries = self.write()?;

        if let Some(disk) = &self.disk {
            let meta = DiskMeta {
                cleared_through: entries.next_id - 1,
                ..entries.meta()
            };
            disk.write_meta(&meta)?;
            entries.cleared_through = meta.cleared_through;

            for &id in entries.by_id.keys() {
                if let Err(err) = disk.remove(id) {
                    warn!(id, error = %err, "Cleared history file left on disk");
                }
            }
        }

        let removed = entries.by_id.len();
        entries.by_id.clear();
        Ok(removed)
    }
}
