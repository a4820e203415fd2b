//! On-disk persistence for history entries: one JSON file per entry, plus a
//! `history.meta` file holding the id counter and the clear watermark.
//!
//! Files are written to a temporary name and renamed into place, so a
//! reader never sees a half-written entry. Entries with an id at or below
//! `cleared_through` are dead even if their file is still present.

use super::store::{HistoryEntry, StoreError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::warn;

const META_FILE: &str = "history.meta";

/// Counters that must survive restarts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskMeta {
    /// Next id to hand out
    pub next_id: u64,
    /// Highest id removed by `clear`
    pub cleared_through: u64,
}

#[derive(Debug, Clone)]
pub struct DiskHistory {
    dir: PathBuf,
}

impl DiskHistory {
    /// Use `dir` for history files, creating it when missing.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Read every stored entry, ordered by id. Unreadable files are skipped.
    pub fn load(&self) -> Result<Vec<HistoryEntry>, StoreError> {
        let mut entries = Vec::new();

        for dir_entry in fs::read_dir(&self.dir)? {
            let path = dir_entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            let parsed = fs::read(&path)
                .map_err(StoreError::from)
                .and_then(|raw| serde_json::from_slice::<HistoryEntry>(&raw).map_err(StoreError::from));

            match parsed {
                Ok(entry) => entries.push(entry),
                Err(err) => warn!(path = %path.display(), error = %err, "Skipping unreadable history file"),
            }
        }

        entries.sort_by_key(|entry| entry.id);
        Ok(entries)
    }

    pub fn write(&self, entry: &HistoryEntry) -> Result<(), StoreError> {
        let raw = serde_json::to_vec_pretty(entry)?;
        self.write_atomic(&format!("{}.json", entry.id), &raw)
    }

    /// Missing meta means a fresh directory.
    pub fn read_meta(&self) -> Result<DiskMeta, StoreError> {
        match fs::read(self.dir.join(META_FILE)) {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(DiskMeta::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn write_meta(&self, meta: &DiskMeta) -> Result<(), StoreError> {
        let raw = serde_json::to_vec(meta)?;
        self.write_atomic(META_FILE, &raw)
    }

    fn write_atomic(&self, name: &str, raw: &[u8]) -> Result<(), StoreError> {
        let tmp_path = self.dir.join(format!(".{}.tmp", name));
        fs::write(&tmp_path, raw)?;
        fs::rename(&tmp_path, self.dir.join(name))?;
        Ok(())
    }

    /// Delete an entry's file; a file that is already gone is not an error.
    pub fn remove(&self, id: u64) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn entry(id: u64, text: &str) -> HistoryEntry {
        HistoryEntry {
            id,
            text: text.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_write_load_remove() {
        let temp_dir = TempDir::new().unwrap();
        let disk = DiskHistory::open(temp_dir.path().join("history")).unwrap();

        disk.write(&entry(2, "second")).unwrap();
        disk.write(&entry(1, "first")).unwrap();

        let loaded = disk.load().unwrap();
        assert_eq!(loaded.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(loaded[1].text, "second");

        disk.remove(1).unwrap();
        disk.remove(1).unwrap();
        assert_eq!(disk.load().unwrap().len(), 1);
    }

    #[test]
    fn test_load_skips_garbage() {
        let temp_dir = TempDir::new().unwrap();
        let disk = DiskHistory::open(temp_dir.path()).unwrap();

        disk.write(&entry(5, "kept")).unwrap();
        fs::write(temp_dir.path().join("6.json"), b"{not json").unwrap();
        fs::write(temp_dir.path().join("notes.txt"), b"ignored").unwrap();

        let loaded = disk.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].text, "kept");
    }

    #[test]
    fn test_meta_defaults_and_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let disk = DiskHistory::open(temp_dir.path()).unwrap();
        assert_eq!(disk.read_meta().unwrap(), DiskMeta::default());

        let meta = DiskMeta {
            next_id: 7,
            cleared_through: 4,
        };
        disk.write_meta(&meta).unwrap();
        assert_eq!(disk.read_meta().unwrap(), meta);

        // The meta file is not mistaken for an entry
        assert!(disk.load().unwrap().is_empty());
    }
}
