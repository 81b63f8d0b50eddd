use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::task::{Status, TaskId, TaskView};

/// Entries kept before the oldest is dropped.
pub const HISTORY_CAPACITY: usize = 20;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history file error: {0}")]
    Io(#[from] io::Error),

    #[error("history file is corrupt: {0}")]
    Json(#[from] serde_json::Error),
}

/// One uploaded (or attempted) file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: TaskId,
    pub file_name: String,
    pub file_size: u64,
    pub status: Status,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub folder: String,
}

impl From<&TaskView> for HistoryEntry {
    fn from(task: &TaskView) -> Self {
        Self {
            id: task.id,
            file_name: task.file_name.clone(),
            file_size: task.size,
            status: task.status,
            progress: task.progress,
            error: task.error.as_ref().map(ToString::to_string),
            timestamp: task.created,
            folder: task.target.folder().to_owned(),
        }
    }
}

impl HistoryEntry {
    #[must_use]
    pub fn is_unfinished(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Where upload history goes. Injected into the orchestrator.
pub trait HistorySink: Send + Sync {
    /// Inserts a new entry or replaces the one with the same id.
    fn record(&self, entry: HistoryEntry) -> Result<(), HistoryError>;

    /// Newest first.
    fn list(&self) -> Vec<HistoryEntry>;

    fn clear(&self) -> Result<(), HistoryError>;

    /// Drops entries that never finished, returning how many.
    fn discard_unfinished(&self) -> Result<usize, HistoryError>;

    /// Entries left `pending` or `uploading`, what a "resume?" prompt shows.
    fn unfinished(&self) -> Vec<HistoryEntry> {
        self.list().into_iter().filter(HistoryEntry::is_unfinished).collect()
    }
}

/// Fixed size log, newest first, oldest evicted.
#[derive(Debug, Clone)]
pub struct BoundedLog {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl BoundedLog {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    fn with_entries(entries: Vec<HistoryEntry>, capacity: usize) -> Self {
        let mut log = Self::new(capacity);
        log.entries.extend(entries);
        log.entries.truncate(log.capacity);
        log
    }

    pub fn upsert(&mut self, entry: HistoryEntry) {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.id == entry.id) {
            *existing = entry;
            return;
        }
        self.entries.push_front(entry);
        self.entries.truncate(self.capacity);
    }

    #[must_use]
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn retain_finished(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| !e.is_unfinished());
        before - self.entries.len()
    }
}

/// History that lives as long as the process.
pub struct MemoryHistory {
    log: Mutex<BoundedLog>,
}

impl MemoryHistory {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            log: Mutex::new(BoundedLog::new(capacity)),
        }
    }

    fn with_log<R>(&self, action: impl FnOnce(&mut BoundedLog) -> R) -> R {
        let mut log = self.log.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        action(&mut log)
    }
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}

impl HistorySink for MemoryHistory {
    fn record(&self, entry: HistoryEntry) -> Result<(), HistoryError> {
        self.with_log(|log| log.upsert(entry));
        Ok(())
    }

    fn list(&self) -> Vec<HistoryEntry> {
        self.with_log(|log| log.entries())
    }

    fn clear(&self) -> Result<(), HistoryError> {
        self.with_log(BoundedLog::clear);
        Ok(())
    }

    fn discard_unfinished(&self) -> Result<usize, HistoryError> {
        Ok(self.with_log(BoundedLog::retain_finished))
    }
}

/// History persisted as a JSON array, rewritten on every change.
pub struct JsonFileHistory {
    path: PathBuf,
    log: Mutex<BoundedLog>,
}

impl JsonFileHistory {
    /// Loads `path` if it exists; a missing file is an empty history.
    pub fn open<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self, HistoryError> {
        let path = path.as_ref().to_path_buf();
        let entries: Vec<HistoryEntry> = match std::fs::read(&path) {
            Ok(data) if data.is_empty() => Vec::new(),
            Ok(data) => serde_json::from_slice(&data)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            log: Mutex::new(BoundedLog::with_entries(entries, capacity)),
        })
    }

    fn update<R>(&self, action: impl FnOnce(&mut BoundedLog) -> R) -> Result<R, HistoryError> {
        let mut log = self.log.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let result = action(&mut log);
        self.save(&log)?;
        Ok(result)
    }

    fn save(&self, log: &BoundedLog) -> Result<(), HistoryError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let data = serde_json::to_vec_pretty(&log.entries)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl HistorySink for JsonFileHistory {
    fn record(&self, entry: HistoryEntry) -> Result<(), HistoryError> {
        self.update(|log| log.upsert(entry))
    }

    fn list(&self) -> Vec<HistoryEntry> {
        self.log
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entries()
    }

    fn clear(&self) -> Result<(), HistoryError> {
        self.update(BoundedLog::clear)
    }

    fn discard_unfinished(&self) -> Result<usize, HistoryError> {
        self.update(BoundedLog::retain_finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn entry(name: &str, status: Status) -> HistoryEntry {
        HistoryEntry {
            id: TaskId::new(),
            file_name: name.to_owned(),
            file_size: 10,
            status,
            progress: 0,
            error: None,
            timestamp: Utc::now(),
            folder: String::new(),
        }
    }

    #[rstest]
    #[case(1, 1)]
    #[case(20, 20)]
    #[case(25, 20)]
    #[trace]
    fn capped_newest_first(#[case] recorded: usize, #[case] kept: usize) {
        // Arrange
        let history = MemoryHistory::default();

        // Act
        for i in 0..recorded {
            history.record(entry(&format!("f{i}"), Status::Success)).unwrap();
        }

        // Assert
        let list = history.list();
        assert_eq!(list.len(), kept);
        assert_eq!(list[0].file_name, format!("f{}", recorded - 1));
        assert_eq!(list[kept - 1].file_name, format!("f{}", recorded - kept));
    }

    #[test]
    fn upsert_keeps_position() {
        // Arrange
        let history = MemoryHistory::default();
        let first = entry("a", Status::Pending);
        history.record(first.clone()).unwrap();
        history.record(entry("b", Status::Pending)).unwrap();

        // Act
        history
            .record(HistoryEntry {
                status: Status::Success,
                progress: 100,
                ..first
            })
            .unwrap();

        // Assert
        let list = history.list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].file_name, "a");
        assert_eq!(list[1].status, Status::Success);
    }

    #[test]
    fn unfinished_entries() {
        // Arrange
        let history = MemoryHistory::default();
        history.record(entry("done", Status::Success)).unwrap();
        history.record(entry("broken", Status::Error)).unwrap();
        history.record(entry("stuck", Status::Uploading)).unwrap();
        history.record(entry("waiting", Status::Pending)).unwrap();

        // Act
        let unfinished = history.unfinished();
        let discarded = history.discard_unfinished().unwrap();

        // Assert
        assert_eq!(unfinished.len(), 2);
        assert_eq!(discarded, 2);
        assert_eq!(history.list().len(), 2);
        assert!(history.unfinished().is_empty());
    }

    #[test]
    fn file_history_survives_reopen() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history.json");
        let history = JsonFileHistory::open(&path, HISTORY_CAPACITY).unwrap();
        history.record(entry("a", Status::Success)).unwrap();
        history.record(entry("b", Status::Uploading)).unwrap();

        // Act
        let reopened = JsonFileHistory::open(&path, HISTORY_CAPACITY).unwrap();

        // Assert
        assert_eq!(reopened.list(), history.list());
        assert_eq!(reopened.unfinished()[0].file_name, "b");
    }

    #[test]
    fn file_history_clear() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let history = JsonFileHistory::open(&path, HISTORY_CAPACITY).unwrap();
        history.record(entry("a", Status::Success)).unwrap();

        // Act
        history.clear().unwrap();
        let reopened = JsonFileHistory::open(&path, HISTORY_CAPACITY).unwrap();

        // Assert
        assert!(reopened.list().is_empty());
    }

    #[test]
    fn corrupt_file_is_reported() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, b"{not json").unwrap();

        // Act
        let history = JsonFileHistory::open(&path, HISTORY_CAPACITY);

        // Assert
        assert!(matches!(history, Err(HistoryError::Json(_))));
    }
}
