use crate::error::UploadError;
use crate::task::{BatchId, Strategy, TaskId, TaskView};

/// What a running task reports about itself. Tasks never touch shared views directly.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    Started { id: TaskId, strategy: Strategy },
    Progress { id: TaskId, percent: u8 },
    /// Session could not be opened, the task now uploads the whole file.
    FellBack { id: TaskId },
    Succeeded { id: TaskId },
    Failed { id: TaskId, error: UploadError },
    /// Cancellation was observed by the task.
    Cancelled { id: TaskId },
}

impl TaskEvent {
    #[must_use]
    pub fn id(&self) -> TaskId {
        match self {
            TaskEvent::Started { id, .. }
            | TaskEvent::Progress { id, .. }
            | TaskEvent::FellBack { id }
            | TaskEvent::Succeeded { id }
            | TaskEvent::Failed { id, .. }
            | TaskEvent::Cancelled { id } => *id,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Everything the orchestrator currently tracks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub tasks: Vec<TaskView>,
    /// Rounded mean of every tracked task's progress.
    pub aggregate: u8,
    pub chunked_enabled: bool,
}

/// Receives task changes from the orchestrator's aggregator, one call at a time.
pub trait UploadObserver: Send + Sync {
    fn on_task_update(&self, _task: &TaskView) {}

    fn on_progress(&self, _aggregate: u8) {}

    /// Called once per batch after every task that was not cancelled is terminal.
    fn on_batch_complete(&self, _batch: BatchId, _summary: &BatchSummary) {}
}

pub struct NoopObserver;

impl UploadObserver for NoopObserver {}
