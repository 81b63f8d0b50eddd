use std::fmt;

use chrono::{DateTime, Utc};
use kernel::TargetPath;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::UploadError;

/// Identifies one upload task for its whole life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Files submitted together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(pub(crate) u64);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Uploading,
    Success,
    Error,
}

impl Status {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Success | Status::Error)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Pending => "pending",
            Status::Uploading => "uploading",
            Status::Success => "success",
            Status::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Resumable session written range by range.
    Chunked,
    /// One multipart request carrying the whole file.
    WholeFile,
}

/// Read-only picture of one task, as last reported by the task itself.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskView {
    pub id: TaskId,
    pub batch: BatchId,
    pub file_name: String,
    pub target: TargetPath,
    pub size: u64,
    pub status: Status,
    pub progress: u8,
    pub strategy: Option<Strategy>,
    pub error: Option<UploadError>,
    pub created: DateTime<Utc>,
}

impl TaskView {
    pub(crate) fn pending(id: TaskId, batch: BatchId, file_name: &str, target: TargetPath, size: u64) -> Self {
        Self {
            id,
            batch,
            file_name: file_name.to_owned(),
            target,
            size,
            status: Status::Pending,
            progress: 0,
            strategy: None,
            error: None,
            created: Utc::now(),
        }
    }

    pub(crate) fn start(&mut self, strategy: Strategy) {
        if self.status == Status::Pending {
            self.status = Status::Uploading;
        }
        self.strategy = Some(strategy);
    }

    /// Progress only moves forward and only while uploading.
    pub(crate) fn advance(&mut self, percent: u8) {
        if self.status == Status::Uploading {
            self.progress = self.progress.max(percent.min(100));
        }
    }

    pub(crate) fn succeed(&mut self) {
        if !self.status.is_terminal() {
            self.status = Status::Success;
            self.progress = 100;
        }
    }

    /// Nothing reached the backend for good, so progress drops back to 0.
    pub(crate) fn fail(&mut self, error: UploadError) {
        if !self.status.is_terminal() {
            self.status = Status::Error;
            self.progress = 0;
            self.error = Some(error);
        }
    }
}
