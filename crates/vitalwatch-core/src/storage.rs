//! Persistent storage for completed vitals snapshots.
//!
//! Reports are kept in JSON files organized by year/month:
//! `<data_dir>/reports/<year>/<month>.json`, each holding an array of
//! [`SnapshotReport`] in insertion order.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::Datelike;
use thiserror::Error;
use tracing::debug;

use crate::types::{SnapshotReport, VitalsSnapshot};

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading a report file failed.
    #[error("Failed to read {}: {source}", path.display())]
    ReadError {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Writing a report file failed.
    #[error("Failed to write {}: {source}", path.display())]
    WriteError {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Creating the directory tree failed.
    #[error("Failed to create directory {}: {source}", path.display())]
    CreateDirError {
        /// Directory path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A report file is not valid JSON.
    #[error("Failed to parse {}: {source}", path.display())]
    ParseError {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// Reports could not be serialized.
    #[error("Failed to serialize reports: {0}")]
    SerializeError(#[from] serde_json::Error),
}

/// Result type for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Durable home for completed snapshots.
pub trait SnapshotStore: Send + Sync + 'static {
    /// Persist a snapshot, returning the stored report.
    ///
    /// # Errors
    ///
    /// Returns an error if the report could not be written.
    fn save(&self, snapshot: &VitalsSnapshot) -> StoreResult<SnapshotReport>;

    /// The newest `limit` reports, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if stored reports could not be read.
    fn recent(&self, limit: usize) -> StoreResult<Vec<SnapshotReport>>;
}

/// Default data directory.
///
/// On Linux: `/var/lib/vitalwatch/`; elsewhere the platform data dir.
#[must_use]
pub fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/lib/vitalwatch")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "vitalwatch").map_or_else(
            || PathBuf::from("./data"),
            |dirs| dirs.data_dir().to_path_buf(),
        )
    }
}

/// [`SnapshotStore`] writing month-bucketed JSON files.
#[derive(Debug)]
pub struct JsonReportStore {
    data_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonReportStore {
    /// Create a store rooted at `data_dir`. Nothing is touched until the
    /// first save.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Root directory of this store.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn reports_dir(&self) -> PathBuf {
        self.data_dir.join("reports")
    }

    fn month_path(&self, year: i32, month: u32) -> PathBuf {
        self.reports_dir()
            .join(format!("{year}"))
            .join(format!("{month:02}.json"))
    }

    fn load_file(path: &Path) -> StoreResult<Vec<SnapshotReport>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(path).map_err(|source| StoreError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| StoreError::ParseError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Month files, newest first.
    fn month_files(&self) -> StoreResult<Vec<PathBuf>> {
        let reports_dir = self.reports_dir();
        if !reports_dir.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for year in sorted_entries(&reports_dir)? {
            if year.is_dir() {
                files.extend(
                    sorted_entries(&year)?
                        .into_iter()
                        .filter(|p| p.extension().is_some_and(|ext| ext == "json")),
                );
            }
        }
        files.reverse();
        Ok(files)
    }
}

fn sorted_entries(dir: &Path) -> StoreResult<Vec<PathBuf>> {
    let read_error = |source| StoreError::ReadError {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = fs::read_dir(dir)
        .map_err(read_error)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(read_error)?;
    entries.sort();
    Ok(entries)
}

impl SnapshotStore for JsonReportStore {
    fn save(&self, snapshot: &VitalsSnapshot) -> StoreResult<SnapshotReport> {
        let report = SnapshotReport::new(*snapshot);
        let path = self.month_path(
            report.created_at_utc.year(),
            report.created_at_utc.month(),
        );

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::CreateDirError {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let mut reports = Self::load_file(&path)?;
        reports.push(report.clone());
        let content = serde_json::to_string_pretty(&reports)?;
        fs::write(&path, content).map_err(|source| StoreError::WriteError {
            path: path.clone(),
            source,
        })?;

        debug!(id = %report.id, path = %path.display(), "Snapshot report saved");
        Ok(report)
    }

    fn recent(&self, limit: usize) -> StoreResult<Vec<SnapshotReport>> {
        let mut recent = Vec::new();
        for path in self.month_files()? {
            if recent.len() >= limit {
                break;
            }
            let mut reports = Self::load_file(&path)?;
            reports.sort_by(|a, b| (b.created_at_utc, b.id).cmp(&(a.created_at_utc, a.id)));
            recent.extend(reports);
        }
        recent.truncate(limit);
        Ok(recent)
    }
}

/// [`SnapshotStore`] kept in memory; used for simulation and tests.
#[derive(Debug, Default)]
pub struct MemoryReportStore {
    reports: Mutex<Vec<SnapshotReport>>,
}

impl MemoryReportStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored reports.
    #[must_use]
    pub fn len(&self) -> usize {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SnapshotStore for MemoryReportStore {
    fn save(&self, snapshot: &VitalsSnapshot) -> StoreResult<SnapshotReport> {
        let report = SnapshotReport::new(*snapshot);
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(report.clone());
        Ok(report)
    }

    fn recent(&self, limit: usize) -> StoreResult<Vec<SnapshotReport>> {
        let reports = self.reports.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(reports.iter().rev().take(limit).cloned().collect())
    }
}
