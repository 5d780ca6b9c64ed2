//! Crash records
//!
//! One JSON document per promotion, written under the cluster's working
//! directory as `crash.<timestamp>-<seq>.json`. File names sort in creation
//! order, so retention simply removes the lexically smallest names.
//!
//! Each document is an envelope carrying the CRC32 of the serialized record;
//! a record whose checksum does not match is reported as corrupt.
//!
//! Writes are atomic: temp file, fsync, rename, fsync of the directory.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::observability::{Event, Logger};

const FILE_PREFIX: &str = "crash.";
const FILE_SUFFIX: &str = ".json";

/// What the coordinator knew about the old and new leader at promotion time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashRecord {
    pub id: Uuid,
    pub cluster: String,
    pub old_leader_url: String,
    pub elected_leader_url: String,
    /// Old leader coordinates the candidate had read when it was promoted.
    pub failover_source_log_file: String,
    pub failover_source_log_pos: u64,
    /// Candidate's own binlog coordinates at promotion time.
    pub new_leader_log_file: String,
    pub new_leader_log_pos: u64,
    /// GTIDs the candidate had received from the old leader.
    pub failover_io_gtid: String,
    pub semi_sync_in_sync: bool,
    pub created_at: DateTime<Utc>,
}

impl CrashRecord {
    pub fn new(
        cluster: impl Into<String>,
        old_leader_url: impl Into<String>,
        elected_leader_url: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            cluster: cluster.into(),
            old_leader_url: old_leader_url.into(),
            elected_leader_url: elected_leader_url.into(),
            failover_source_log_file: String::new(),
            failover_source_log_pos: 0,
            new_leader_log_file: String::new(),
            new_leader_log_pos: 0,
            failover_io_gtid: String::new(),
            semi_sync_in_sync: false,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    checksum: u32,
    record: CrashRecord,
}

#[derive(Debug, Error)]
pub enum CrashStoreError {
    #[error("crash store I/O on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("crash record encoding: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("corrupt crash record {path}: {reason}")]
    Corrupt { path: String, reason: String },
}

impl CrashStoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

pub type CrashStoreResult<T> = Result<T, CrashStoreError>;

fn checksum(record: &CrashRecord) -> CrashStoreResult<u32> {
    let bytes = serde_json::to_vec(record)?;
    Ok(crc32fast::hash(&bytes))
}

/// File-backed crash history for one cluster.
#[derive(Debug)]
pub struct CrashStore {
    dir: PathBuf,
    seq: AtomicU64,
}

impl CrashStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            seq: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist a record and return its path.
    pub fn append(&self, record: &CrashRecord) -> CrashStoreResult<PathBuf> {
        fs::create_dir_all(&self.dir).map_err(|e| CrashStoreError::io(&self.dir, e))?;

        let envelope = Envelope {
            checksum: checksum(record)?,
            record: record.clone(),
        };
        let content = serde_json::to_string_pretty(&envelope)?;

        let stamp = record.created_at.format("%Y%m%d%H%M%S%3f");
        let path = loop {
            let seq = self.seq.fetch_add(1, Ordering::Relaxed);
            let candidate = self
                .dir
                .join(format!("{}{}-{:04}{}", FILE_PREFIX, stamp, seq, FILE_SUFFIX));
            if !candidate.exists() {
                break candidate;
            }
        };
        let temp_path = path.with_extension("json.tmp");

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| CrashStoreError::io(&temp_path, e))?;
        file.write_all(content.as_bytes())
            .map_err(|e| CrashStoreError::io(&temp_path, e))?;
        file.sync_all().map_err(|e| CrashStoreError::io(&temp_path, e))?;

        fs::rename(&temp_path, &path).map_err(|e| CrashStoreError::io(&path, e))?;

        if let Ok(dir) = File::open(&self.dir) {
            let _ = dir.sync_all();
        }

        Ok(path)
    }

    /// Read and verify one record.
    pub fn load(path: &Path) -> CrashStoreResult<CrashRecord> {
        let raw = fs::read_to_string(path).map_err(|e| CrashStoreError::io(path, e))?;
        let envelope: Envelope =
            serde_json::from_str(&raw).map_err(|e| CrashStoreError::Corrupt {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        let actual = checksum(&envelope.record)?;
        if actual != envelope.checksum {
            return Err(CrashStoreError::Corrupt {
                path: path.display().to_string(),
                reason: format!(
                    "checksum mismatch: stored {:08x}, computed {:08x}",
                    envelope.checksum, actual
                ),
            });
        }
        Ok(envelope.record)
    }

    /// Record files, oldest first.
    pub fn list(&self) -> CrashStoreResult<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CrashStoreError::io(&self.dir, e)),
        };
        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CrashStoreError::io(&self.dir, e))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(FILE_PREFIX) && name.ends_with(FILE_SUFFIX) {
                paths.push(entry.path());
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Every intact record, oldest first. Corrupt documents are logged and skipped.
    pub fn load_all(&self) -> CrashStoreResult<Vec<CrashRecord>> {
        let mut records = Vec::new();
        for path in self.list()? {
            match Self::load(&path) {
                Ok(record) => records.push(record),
                Err(e) => {
                    let path = path.display().to_string();
                    let error = e.to_string();
                    Logger::warn(
                        Event::CrashStoreFailed.as_str(),
                        &[("path", path.as_str()), ("error", error.as_str())],
                    );
                }
            }
        }
        Ok(records)
    }

    /// Keep the newest `retention` records; returns how many were removed.
    pub fn purge(&self, retention: usize) -> CrashStoreResult<usize> {
        let paths = self.list()?;
        let excess = paths.len().saturating_sub(retention);
        for path in &paths[..excess] {
            fs::remove_file(path).map_err(|e| CrashStoreError::io(path, e))?;
            let shown = path.display().to_string();
            Logger::info(Event::CrashPurged.as_str(), &[("path", shown.as_str())]);
        }
        Ok(excess)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(old: &str, new: &str) -> CrashRecord {
        let mut record = CrashRecord::new("shard1", old, new);
        record.failover_source_log_file = "mariadb-bin.000003".to_string();
        record.failover_source_log_pos = 4711;
        record.new_leader_log_file = "mariadb-bin.000001".to_string();
        record.new_leader_log_pos = 328;
        record.failover_io_gtid = "0-1-100".to_string();
        record.semi_sync_in_sync = true;
        record
    }

    #[test]
    fn test_append_and_reload_identical() {
        let dir = tempfile::tempdir().unwrap();
        let store = CrashStore::new(dir.path());
        let original = record("db1:3306", "db2:3306");

        let path = store.append(&original).unwrap();
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("crash."));

        let loaded = CrashStore::load(&path).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = CrashStore::new(dir.path());
        store.append(&record("a:1", "b:1")).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with(".json"));
    }

    #[test]
    fn test_tampered_record_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = CrashStore::new(dir.path());
        let path = store.append(&record("db1:3306", "db2:3306")).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        fs::write(&path, raw.replace("db2:3306", "db9:3306")).unwrap();

        let err = CrashStore::load(&path).unwrap_err();
        assert!(matches!(err, CrashStoreError::Corrupt { .. }));
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_purge_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let store = CrashStore::new(dir.path());
        for i in 0..4 {
            store.append(&record("db1:3306", &format!("db{}:3306", i))).unwrap();
        }

        assert_eq!(store.purge(2).unwrap(), 2);
        let remaining = store.load_all().unwrap();
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].elected_leader_url, "db2:3306");
        assert_eq!(remaining[1].elected_leader_url, "db3:3306");
    }

    #[test]
    fn test_missing_directory_is_empty_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = CrashStore::new(dir.path().join("absent"));
        assert!(store.load_all().unwrap().is_empty());
        assert_eq!(store.purge(3).unwrap(), 0);
    }
}
