//! Runs many uploads at once, each in its own tokio task.
//!
//! Tasks own their source, session and cancellation token, and report through
//! [`TaskEvent`]s on one channel. A single aggregator task folds those events
//! into the task views, history, observer calls and published snapshots, so
//! the only state shared between tasks is the chunked-mode flag and the
//! token registry.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use kernel::TargetPath;
use tokio::sync::{mpsc, oneshot, watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::UploadError;
use crate::event::{BatchSummary, Snapshot, TaskEvent, UploadObserver};
use crate::history::{HistoryEntry, HistorySink};
use crate::negotiator;
use crate::source::{human_size, SourceFile};
use crate::task::{BatchId, Status, Strategy, TaskId, TaskView};
use crate::transmitter::{self, TransmitEvent, DEFAULT_CHUNK_SIZE};
use crate::transport::{Transport, WholeProgress};

const MB: u64 = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Bytes per range of a chunked upload.
    pub chunk_size: u64,
    /// Files strictly larger than this go chunked while chunked mode is on.
    pub chunked_threshold: u64,
    /// Larger files are rejected before submission.
    pub max_file_size: u64,
    /// Tasks uploading at the same time.
    pub max_concurrent: usize,
    /// Pause between a batch finishing and its completion callback.
    pub settle_delay: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunked_threshold: 50 * MB,
            max_file_size: 200 * MB,
            max_concurrent: 4,
            settle_delay: Duration::from_millis(500),
        }
    }
}

/// Outcome of [`Orchestrator::submit`].
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    /// `None` when no file passed validation.
    pub batch: Option<BatchId>,
    pub tasks: Vec<TaskId>,
    /// Files that never became tasks, described in one message.
    pub rejected: Option<UploadError>,
}

enum Message {
    Queued(TaskView),
    Task(TaskEvent),
    /// Cancelled from outside, drop it now.
    Remove(TaskId),
    CancelAll,
    ClearFinished,
    Flush(oneshot::Sender<()>),
}

enum Outcome {
    Uploaded,
    Cancelled,
}

/// Everything a task needs, shared by all of them.
struct Shared {
    config: OrchestratorConfig,
    transport: Arc<dyn Transport>,
    chunked_enabled: Arc<AtomicBool>,
    slots: Arc<Semaphore>,
    tokens: Mutex<HashMap<TaskId, CancellationToken>>,
    events: mpsc::UnboundedSender<Message>,
}

impl Shared {
    fn send(&self, event: TaskEvent) {
        // the aggregator only stops once every sender is gone
        let _ = self.events.send(Message::Task(event));
    }

    fn tokens(&self) -> std::sync::MutexGuard<'_, HashMap<TaskId, CancellationToken>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn strategy_for(&self, size: u64) -> Strategy {
        if size > self.config.chunked_threshold && self.chunked_enabled.load(Ordering::SeqCst) {
            Strategy::Chunked
        } else {
            Strategy::WholeFile
        }
    }

    /// One way switch to whole-file uploads.
    fn disable_chunked(&self, reason: &str) {
        if self.chunked_enabled.swap(false, Ordering::SeqCst) {
            tracing::warn!("chunked uploads disabled for this session: {reason}");
        }
    }
}

pub struct Orchestrator {
    shared: Arc<Shared>,
    snapshots: watch::Receiver<Snapshot>,
    tracker: TaskTracker,
    next_batch: AtomicU64,
}

impl Orchestrator {
    /// Starts the aggregator. Must be called inside a tokio runtime.
    pub fn new(
        transport: Arc<dyn Transport>,
        config: OrchestratorConfig,
        history: Arc<dyn HistorySink>,
        observer: Arc<dyn UploadObserver>,
    ) -> Self {
        let (events, inbox) = mpsc::unbounded_channel();
        let (publisher, snapshots) = watch::channel(Snapshot {
            chunked_enabled: true,
            ..Snapshot::default()
        });
        let tracker = TaskTracker::new();
        let chunked_enabled = Arc::new(AtomicBool::new(true));

        let aggregator = Aggregator {
            tasks: Vec::new(),
            batches: HashMap::new(),
            history,
            observer,
            publisher,
            chunked_enabled: Arc::clone(&chunked_enabled),
            settle_delay: config.settle_delay,
            tracker: tracker.clone(),
            last_aggregate: None,
        };
        let shared = Arc::new(Shared {
            slots: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            config,
            transport,
            chunked_enabled,
            tokens: Mutex::default(),
            events,
        });
        tokio::spawn(aggregator.run(inbox));

        Self {
            shared,
            snapshots,
            tracker,
            next_batch: AtomicU64::new(1),
        }
    }

    /// Validates `files` and starts one task per valid file as one batch.
    ///
    /// Invalid files are reported together in [`Submission::rejected`] and
    /// never touch the network; the valid ones are submitted anyway.
    pub fn submit(&self, files: Vec<SourceFile>, target_folder: &str) -> Submission {
        let (valid, rejected) = self.validate(files, target_folder);
        if valid.is_empty() {
            return Submission {
                batch: None,
                tasks: Vec::new(),
                rejected,
            };
        }

        let batch = BatchId(self.next_batch.fetch_add(1, Ordering::SeqCst));
        let mut tasks = Vec::with_capacity(valid.len());
        for (source, target) in valid {
            let id = TaskId::new();
            let token = CancellationToken::new();
            self.shared.tokens().insert(id, token.clone());
            let view = TaskView::pending(id, batch, source.name(), target.clone(), source.size());
            let _ = self.shared.events.send(Message::Queued(view));

            tracing::debug!("task {id} queued for {target} ({})", human_size(source.size()));
            self.tracker
                .spawn(run_task(Arc::clone(&self.shared), id, source, target, token));
            tasks.push(id);
        }

        Submission {
            batch: Some(batch),
            tasks,
            rejected,
        }
    }

    fn validate(&self, files: Vec<SourceFile>, folder: &str) -> (Vec<(SourceFile, TargetPath)>, Option<UploadError>) {
        let limit = self.shared.config.max_file_size;
        let mut valid = Vec::new();
        let mut oversized = Vec::new();
        let mut unnamed = Vec::new();
        for source in files {
            let target = TargetPath::new(folder, source.name());
            if target.is_empty() {
                unnamed.push(source.name().to_owned());
            } else if source.size() > limit {
                oversized.push(format!("{} ({})", source.name(), human_size(source.size())));
            } else {
                valid.push((source, target));
            }
        }

        let mut problems = Vec::new();
        let limit = format!("{}MB", limit / MB);
        match oversized.len() {
            0 => {}
            1 => problems.push(format!("File exceeds the {limit} limit: {}", oversized[0])),
            n => problems.push(format!("{n} files exceed the {limit} limit: {}", oversized.join(", "))),
        }
        match unnamed.len() {
            0 => {}
            1 => problems.push(format!("File has an empty name: '{}'", unnamed[0])),
            n => problems.push(format!("{n} files have an empty name")),
        }
        let rejected = if problems.is_empty() {
            None
        } else {
            let message = problems.join("; ");
            tracing::warn!("{message}");
            Some(UploadError::Validation(message))
        };
        (valid, rejected)
    }

    /// Stops a task and drops it from the active set at once.
    ///
    /// A whole-file request in flight is abandoned; a chunked transfer stops
    /// before its next range. Returns `false` for unknown or finished tasks.
    pub fn cancel(&self, id: TaskId) -> bool {
        let Some(token) = self.shared.tokens().remove(&id) else {
            return false;
        };
        token.cancel();
        tracing::info!("task {id} cancelled");
        let _ = self.shared.events.send(Message::Remove(id));
        true
    }

    /// Cancels every unfinished task and forgets every tracked one. No batch completes.
    pub fn cancel_all(&self) {
        let cancelled = {
            let mut tokens = self.shared.tokens();
            for token in tokens.values() {
                token.cancel();
            }
            let n = tokens.len();
            tokens.clear();
            n
        };
        tracing::info!("{cancelled} tasks cancelled");
        let _ = self.shared.events.send(Message::CancelAll);
    }

    /// Forgets tasks that reached `Success` or `Error`.
    pub fn clear_finished(&self) {
        let _ = self.shared.events.send(Message::ClearFinished);
    }

    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    #[must_use]
    pub fn chunked_enabled(&self) -> bool {
        self.shared.chunked_enabled.load(Ordering::SeqCst)
    }

    /// Waits until every task ended and every event, callback included, was handled.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.flush().await;
        // completion callbacks are spawned by the aggregator while flushing
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    async fn flush(&self) {
        let (done, flushed) = oneshot::channel();
        if self.shared.events.send(Message::Flush(done)).is_ok() {
            let _ = flushed.await;
        }
    }
}

async fn run_task(shared: Arc<Shared>, id: TaskId, source: SourceFile, target: TargetPath, token: CancellationToken) {
    let permit = tokio::select! {
        biased;
        () = token.cancelled() => return,
        permit = Arc::clone(&shared.slots).acquire_owned() => permit,
    };
    let Ok(_permit) = permit else {
        return;
    };

    let outcome = upload(&shared, id, &source, &target, &token).await;
    shared.tokens().remove(&id);

    let event = match outcome {
        Ok(Outcome::Uploaded) => {
            tracing::info!("{target} uploaded");
            TaskEvent::Succeeded { id }
        }
        Ok(Outcome::Cancelled) => TaskEvent::Cancelled { id },
        Err(error) => {
            tracing::error!("{target} failed: {error}");
            TaskEvent::Failed { id, error }
        }
    };
    shared.send(event);
}

async fn upload(
    shared: &Shared,
    id: TaskId,
    source: &SourceFile,
    target: &TargetPath,
    token: &CancellationToken,
) -> Result<Outcome, UploadError> {
    let strategy = shared.strategy_for(source.size());
    shared.send(TaskEvent::Started { id, strategy });

    if strategy == Strategy::Chunked {
        match upload_chunked(shared, id, source, target, token).await {
            Err(UploadError::SessionInit(reason)) => {
                shared.disable_chunked(&reason);
                shared.send(TaskEvent::FellBack { id });
            }
            other => return other,
        }
    }
    upload_whole(shared, id, source, target, token).await
}

async fn upload_chunked(
    shared: &Shared,
    id: TaskId,
    source: &SourceFile,
    target: &TargetPath,
    token: &CancellationToken,
) -> Result<Outcome, UploadError> {
    let transport = shared.transport.as_ref();
    let session =
        negotiator::open_session(transport, target, Some(source.content_type()), source.size()).await?;

    let events = transmitter::transmit(transport, &session, source, shared.config.chunk_size, token);
    futures::pin_mut!(events);
    while let Some(event) = events.next().await {
        match event? {
            TransmitEvent::Progress { percent, .. } => shared.send(TaskEvent::Progress { id, percent }),
            TransmitEvent::Complete => return Ok(Outcome::Uploaded),
            TransmitEvent::Cancelled => return Ok(Outcome::Cancelled),
        }
    }
    Err(UploadError::ChunkUpload {
        start: 0,
        end: source.size(),
        reason: "transfer ended without confirmation".to_owned(),
    })
}

async fn upload_whole(
    shared: &Shared,
    id: TaskId,
    source: &SourceFile,
    target: &TargetPath,
    token: &CancellationToken,
) -> Result<Outcome, UploadError> {
    let events = shared.events.clone();
    let progress: WholeProgress = Arc::new(move |percent| {
        let _ = events.send(Message::Task(TaskEvent::Progress { id, percent }));
    });
    let send = async {
        let data = source.read_all().await?;
        shared
            .transport
            .upload_whole(target, source.content_type(), data, progress)
            .await
    };
    tokio::select! {
        biased;
        () = token.cancelled() => Ok(Outcome::Cancelled),
        sent = send => sent.map(|()| Outcome::Uploaded),
    }
}

#[derive(Default)]
struct BatchState {
    remaining: HashSet<TaskId>,
    summary: BatchSummary,
}

/// Sole owner of the task views.
struct Aggregator {
    tasks: Vec<TaskView>,
    batches: HashMap<BatchId, BatchState>,
    history: Arc<dyn HistorySink>,
    observer: Arc<dyn UploadObserver>,
    publisher: watch::Sender<Snapshot>,
    chunked_enabled: Arc<AtomicBool>,
    settle_delay: Duration,
    tracker: TaskTracker,
    last_aggregate: Option<u8>,
}

impl Aggregator {
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Message>) {
        while let Some(message) = inbox.recv().await {
            match message {
                Message::Queued(view) => {
                    let id = view.id;
                    self.batches.entry(view.batch).or_default().remaining.insert(id);
                    self.tasks.push(view);
                    self.changed(id, true);
                }
                Message::Task(event) => self.apply(event),
                Message::Remove(id) => self.remove(id),
                Message::CancelAll => {
                    self.tasks.clear();
                    self.batches.clear();
                }
                Message::ClearFinished => self.tasks.retain(|t| !t.status.is_terminal()),
                Message::Flush(done) => {
                    let _ = done.send(());
                    continue;
                }
            }
            self.publish();
        }
        tracing::debug!("upload aggregator stopped");
    }

    fn apply(&mut self, event: TaskEvent) {
        let id = event.id();
        if let TaskEvent::Cancelled { .. } = event {
            self.remove(id);
            return;
        }
        let Some(task) = self.tasks.iter_mut().find(|t| t.id == id) else {
            // removed by cancel, late reports change nothing
            return;
        };
        let before = task.status;
        match event {
            TaskEvent::Started { strategy, .. } => task.start(strategy),
            TaskEvent::Progress { percent, .. } => task.advance(percent),
            TaskEvent::FellBack { .. } => task.strategy = Some(Strategy::WholeFile),
            TaskEvent::Succeeded { .. } => task.succeed(),
            TaskEvent::Failed { error, .. } => task.fail(error),
            TaskEvent::Cancelled { .. } => {}
        }
        let (status, batch) = (task.status, task.batch);
        self.changed(id, status != before);
        if status.is_terminal() {
            self.settle(batch, id, status == Status::Success);
        }
    }

    fn remove(&mut self, id: TaskId) {
        let Some(pos) = self.tasks.iter().position(|t| t.id == id) else {
            return;
        };
        let task = self.tasks.remove(pos);
        if let Some(batch) = self.batches.get_mut(&task.batch) {
            if batch.remaining.remove(&id) {
                batch.summary.cancelled += 1;
            }
        }
        self.finish_batch(task.batch);
    }

    fn settle(&mut self, batch_id: BatchId, id: TaskId, succeeded: bool) {
        if let Some(batch) = self.batches.get_mut(&batch_id) {
            if batch.remaining.remove(&id) {
                if succeeded {
                    batch.summary.succeeded += 1;
                } else {
                    batch.summary.failed += 1;
                }
            }
        }
        self.finish_batch(batch_id);
    }

    /// Fires the completion callback once the batch has nothing left running.
    fn finish_batch(&mut self, batch_id: BatchId) {
        let done = self
            .batches
            .get(&batch_id)
            .is_some_and(|b| b.remaining.is_empty());
        if !done {
            return;
        }
        let Some(batch) = self.batches.remove(&batch_id) else {
            return;
        };
        let summary = batch.summary;
        if summary.succeeded + summary.failed == 0 {
            tracing::debug!("batch {batch_id} cancelled entirely");
            return;
        }

        tracing::info!(
            "batch {batch_id} complete: {} uploaded, {} failed, {} cancelled",
            summary.succeeded,
            summary.failed,
            summary.cancelled
        );
        let observer = Arc::clone(&self.observer);
        let delay = self.settle_delay;
        self.tracker.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            observer.on_batch_complete(batch_id, &summary);
        });
    }

    /// History is written on status transitions only, the observer hears every change.
    fn changed(&self, id: TaskId, transition: bool) {
        let Some(task) = self.tasks.iter().find(|t| t.id == id) else {
            return;
        };
        if transition {
            if let Err(e) = self.history.record(HistoryEntry::from(task)) {
                tracing::warn!("history not updated for {}: {e}", task.file_name);
            }
        }
        self.observer.on_task_update(task);
    }

    fn aggregate(&self) -> u8 {
        let n = self.tasks.len() as u64;
        if n == 0 {
            return 0;
        }
        let sum: u64 = self.tasks.iter().map(|t| u64::from(t.progress)).sum();
        u8::try_from((sum * 2 + n) / (n * 2)).unwrap_or(100)
    }

    fn publish(&mut self) {
        let aggregate = self.aggregate();
        if self.last_aggregate != Some(aggregate) {
            self.last_aggregate = Some(aggregate);
            self.observer.on_progress(aggregate);
        }
        let chunked_enabled = self.chunked_enabled.load(Ordering::SeqCst);
        self.publisher.send_replace(Snapshot {
            tasks: self.tasks.clone(),
            aggregate,
            chunked_enabled,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{HistoryError, MemoryHistory};
    use crate::testing::{Gate, Script, ScriptedTransport};
    use crate::transport::ChunkReply;

    #[derive(Default)]
    struct Recorder {
        updates: Mutex<Vec<TaskView>>,
        progress: Mutex<Vec<u8>>,
        batches: Mutex<Vec<(BatchId, BatchSummary)>>,
    }

    impl Recorder {
        fn updates_of(&self, id: TaskId) -> Vec<TaskView> {
            self.updates
                .lock()
                .unwrap()
                .iter()
                .filter(|t| t.id == id)
                .cloned()
                .collect()
        }

        fn batches(&self) -> Vec<(BatchId, BatchSummary)> {
            self.batches.lock().unwrap().clone()
        }
    }

    impl UploadObserver for Recorder {
        fn on_task_update(&self, task: &TaskView) {
            self.updates.lock().unwrap().push(task.clone());
        }

        fn on_progress(&self, aggregate: u8) {
            self.progress.lock().unwrap().push(aggregate);
        }

        fn on_batch_complete(&self, batch: BatchId, summary: &BatchSummary) {
            self.batches.lock().unwrap().push((batch, *summary));
        }
    }

    /// Keeps every write it is handed.
    #[derive(Default)]
    struct CountingHistory {
        inner: MemoryHistory,
        writes: Mutex<Vec<(Status, u8)>>,
    }

    impl HistorySink for CountingHistory {
        fn record(&self, entry: HistoryEntry) -> Result<(), HistoryError> {
            self.writes.lock().unwrap().push((entry.status, entry.progress));
            self.inner.record(entry)
        }

        fn list(&self) -> Vec<HistoryEntry> {
            self.inner.list()
        }

        fn clear(&self) -> Result<(), HistoryError> {
            self.inner.clear()
        }

        fn discard_unfinished(&self) -> Result<usize, HistoryError> {
            self.inner.discard_unfinished()
        }
    }

    struct Fixture {
        orchestrator: Orchestrator,
        transport: Arc<ScriptedTransport>,
        recorder: Arc<Recorder>,
        history: Arc<MemoryHistory>,
    }

    /// Small sizes: 5 byte chunks, anything above 10 bytes goes chunked.
    fn small_config() -> OrchestratorConfig {
        OrchestratorConfig {
            chunk_size: 5,
            chunked_threshold: 10,
            max_file_size: 100,
            max_concurrent: 4,
            settle_delay: Duration::ZERO,
        }
    }

    fn fixture(script: Script, config: OrchestratorConfig) -> Fixture {
        let transport = Arc::new(ScriptedTransport::new(script));
        let recorder = Arc::new(Recorder::default());
        let history = Arc::new(MemoryHistory::default());
        let orchestrator = Orchestrator::new(
            transport.clone(),
            config,
            history.clone(),
            recorder.clone(),
        );
        Fixture {
            orchestrator,
            transport,
            recorder,
            history,
        }
    }

    fn file(name: &str, size: usize) -> SourceFile {
        SourceFile::from_bytes(name.to_owned(), vec![1u8; size])
    }

    #[tokio::test]
    async fn large_file_goes_chunked_and_succeeds() {
        // Arrange
        let config = OrchestratorConfig {
            chunked_threshold: MB,
            settle_delay: Duration::ZERO,
            ..OrchestratorConfig::default()
        };
        let f = fixture(Script::default(), config);

        // Act
        let submission = f
            .orchestrator
            .submit(vec![file("video.mp4", 10 * MB as usize)], "media");
        f.orchestrator.wait_idle().await;

        // Assert
        let id = submission.tasks[0];
        assert_eq!(
            f.transport.chunk_ranges(),
            vec![(0, 5 * MB), (5 * MB, 10 * MB)]
        );
        let progress: Vec<u8> = f.recorder.updates_of(id).iter().map(|t| t.progress).collect();
        assert_eq!(progress, vec![0, 0, 50, 100]);
        let last = f.recorder.updates_of(id).pop().unwrap();
        assert_eq!(last.status, Status::Success);
        assert_eq!(last.strategy, Some(Strategy::Chunked));
        let history = f.history.list();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, Status::Success);
        assert_eq!(history[0].folder, "media");
        assert_eq!(f.recorder.batches().len(), 1);
    }

    #[tokio::test]
    async fn oversized_file_never_reaches_the_network() {
        // Arrange
        let f = fixture(Script::default(), OrchestratorConfig {
            settle_delay: Duration::ZERO,
            ..OrchestratorConfig::default()
        });

        // Act
        let submission = f
            .orchestrator
            .submit(vec![SourceFile::sized("huge.iso", 250 * MB)], "");
        f.orchestrator.wait_idle().await;

        // Assert
        assert_eq!(submission.batch, None);
        assert!(submission.tasks.is_empty());
        assert_eq!(
            submission.rejected,
            Some(UploadError::Validation(
                "File exceeds the 200MB limit: huge.iso (250.0 MB)".to_owned()
            ))
        );
        assert_eq!(f.transport.session_requests(), 0);
        assert!(f.transport.whole_uploads().is_empty());
        assert!(f.orchestrator.snapshot().tasks.is_empty());
    }

    #[tokio::test]
    async fn valid_files_are_submitted_beside_rejected_ones() {
        // Arrange
        let f = fixture(Script::default(), OrchestratorConfig {
            settle_delay: Duration::ZERO,
            ..OrchestratorConfig::default()
        });
        let files = vec![
            SourceFile::sized("a.iso", 250 * MB),
            file("notes.txt", 3),
            SourceFile::sized("b.iso", 300 * MB),
            file("???", 3),
        ];

        // Act
        let submission = f.orchestrator.submit(files, "docs");
        f.orchestrator.wait_idle().await;

        // Assert
        assert_eq!(submission.tasks.len(), 1);
        assert_eq!(
            submission.rejected,
            Some(UploadError::Validation(
                "2 files exceed the 200MB limit: a.iso (250.0 MB), b.iso (300.0 MB); File has an empty name: '???'"
                    .to_owned()
            ))
        );
        assert_eq!(f.transport.whole_uploads(), vec!["docs/notes.txt".to_owned()]);
    }

    #[tokio::test]
    async fn session_failure_falls_back_for_the_rest_of_the_session() {
        // Arrange
        let f = fixture(
            Script {
                fail_sessions: true,
                ..Script::default()
            },
            OrchestratorConfig {
                max_concurrent: 1,
                ..small_config()
            },
        );

        // Act
        let first = f
            .orchestrator
            .submit(vec![file("a.bin", 20), file("b.bin", 30)], "");
        f.orchestrator.wait_idle().await;
        let later = f.orchestrator.submit(vec![file("c.bin", 40)], "");
        f.orchestrator.wait_idle().await;

        // Assert
        assert_eq!(f.transport.session_requests(), 1);
        assert!(f.transport.chunk_ranges().is_empty());
        assert_eq!(f.transport.whole_uploads().len(), 3);
        assert!(!f.orchestrator.chunked_enabled());
        let snapshot = f.orchestrator.snapshot();
        assert!(!snapshot.chunked_enabled);
        for id in first.tasks.iter().chain(&later.tasks) {
            let task = snapshot.tasks.iter().find(|t| t.id == *id).unwrap();
            assert_eq!(task.status, Status::Success);
            assert_eq!(task.strategy, Some(Strategy::WholeFile));
        }
    }

    #[tokio::test]
    async fn rejected_chunk_fails_only_its_task() {
        // Arrange
        let f = fixture(
            Script {
                chunk_replies: vec![(1, ChunkReply::Rejected("Unexpected response status: 500".to_owned()))],
                ..Script::default()
            },
            small_config(),
        );

        // Act
        let submission = f
            .orchestrator
            .submit(vec![file("big.bin", 15), file("small.txt", 4)], "");
        f.orchestrator.wait_idle().await;

        // Assert
        assert_eq!(f.transport.chunk_ranges(), vec![(0, 5), (5, 10)]);
        let snapshot = f.orchestrator.snapshot();
        let big = snapshot.tasks.iter().find(|t| t.id == submission.tasks[0]).unwrap();
        let small = snapshot.tasks.iter().find(|t| t.id == submission.tasks[1]).unwrap();
        assert_eq!(big.status, Status::Error);
        assert_eq!(
            big.error,
            Some(UploadError::ChunkUpload {
                start: 5,
                end: 10,
                reason: "Unexpected response status: 500".to_owned()
            })
        );
        assert_eq!(big.progress, 0);
        assert_eq!(small.status, Status::Success);
        assert_eq!(snapshot.aggregate, 50);
        let recorded = f.history.list();
        let big_entry = recorded.iter().find(|e| e.id == big.id).unwrap();
        assert_eq!((big_entry.status, big_entry.progress), (Status::Error, 0));
        assert!(f.orchestrator.chunked_enabled());
        assert_eq!(
            f.recorder.batches(),
            vec![(
                submission.batch.unwrap(),
                BatchSummary {
                    succeeded: 1,
                    failed: 1,
                    cancelled: 0
                }
            )]
        );
    }

    #[tokio::test]
    async fn cancel_between_chunks_stops_the_transfer() {
        // Arrange
        let gate = Arc::new(Gate::default());
        let f = fixture(
            Script {
                hold_chunk: Some((1, gate.clone())),
                ..Script::default()
            },
            small_config(),
        );
        let submission = f.orchestrator.submit(vec![file("big.bin", 15)], "");
        let id = submission.tasks[0];
        gate.wait_reached().await;

        // Act
        let cancelled = f.orchestrator.cancel(id);
        gate.release();
        f.orchestrator.wait_idle().await;

        // Assert
        assert!(cancelled);
        assert_eq!(f.transport.chunk_ranges(), vec![(0, 5), (5, 10)]);
        assert!(f.orchestrator.snapshot().tasks.is_empty());
        assert!(f
            .recorder
            .updates_of(id)
            .iter()
            .all(|t| !t.status.is_terminal()));
        assert!(f.recorder.batches().is_empty());
        assert_eq!(f.history.unfinished().len(), 1);
        assert!(!f.orchestrator.cancel(id));
    }

    #[tokio::test]
    async fn cancel_abandons_whole_file_request() {
        // Arrange
        let gate = Arc::new(Gate::default());
        let f = fixture(
            Script {
                hold_whole: Some(gate.clone()),
                ..Script::default()
            },
            small_config(),
        );
        let submission = f.orchestrator.submit(vec![file("a.txt", 3)], "");
        gate.wait_reached().await;

        // Act
        f.orchestrator.cancel(submission.tasks[0]);
        f.orchestrator.wait_idle().await;

        // Assert
        assert!(f.orchestrator.snapshot().tasks.is_empty());
        assert!(f.recorder.batches().is_empty());
    }

    #[tokio::test]
    async fn cancel_all_forgets_everything() {
        // Arrange
        let gate = Arc::new(Gate::default());
        let f = fixture(
            Script {
                hold_whole: Some(gate.clone()),
                ..Script::default()
            },
            OrchestratorConfig {
                max_concurrent: 1,
                ..small_config()
            },
        );
        f.orchestrator
            .submit(vec![file("a.txt", 3), file("b.txt", 3), file("c.txt", 3)], "");
        gate.wait_reached().await;

        // Act
        f.orchestrator.cancel_all();
        f.orchestrator.wait_idle().await;

        // Assert
        assert_eq!(f.transport.whole_uploads().len(), 1);
        assert!(f.orchestrator.snapshot().tasks.is_empty());
        assert!(f.recorder.batches().is_empty());
    }

    #[tokio::test]
    async fn aggregate_is_rounded_mean() {
        // Arrange
        let gate = Arc::new(Gate::default());
        let f = fixture(
            Script {
                hold_chunk: Some((1, gate.clone())),
                ..Script::default()
            },
            small_config(),
        );
        f.orchestrator.submit(vec![file("small.txt", 3)], "");
        f.orchestrator.wait_idle().await;

        // Act
        f.orchestrator.submit(vec![file("big.bin", 15)], "");
        gate.wait_reached().await;
        f.orchestrator.flush().await;
        let midway = f.orchestrator.snapshot();
        gate.release();
        f.orchestrator.wait_idle().await;
        let end = f.orchestrator.snapshot();

        // Assert
        let progress: Vec<u8> = midway.tasks.iter().map(|t| t.progress).collect();
        assert_eq!(progress, vec![100, 33]);
        assert_eq!(midway.aggregate, 67);
        assert_eq!(end.aggregate, 100);
        assert!(f.recorder.progress.lock().unwrap().iter().all(|p| *p <= 100));
    }

    #[tokio::test]
    async fn concurrency_is_bounded_and_batches_complete_once() {
        // Arrange
        let f = fixture(
            Script {
                whole_delay: Some(Duration::from_millis(10)),
                ..Script::default()
            },
            OrchestratorConfig {
                max_concurrent: 2,
                ..small_config()
            },
        );
        let files: Vec<SourceFile> = (0..6).map(|i| file(&format!("f{i}.txt"), 3)).collect();

        // Act
        let first = f.orchestrator.submit(files, "many");
        let second = f.orchestrator.submit(vec![file("last.txt", 3)], "many");
        f.orchestrator.wait_idle().await;

        // Assert
        assert!(f.transport.max_active() <= 2);
        assert_eq!(f.transport.whole_uploads().len(), 7);
        let batches = f.recorder.batches();
        assert_eq!(batches.len(), 2);
        assert!(batches.contains(&(
            first.batch.unwrap(),
            BatchSummary {
                succeeded: 6,
                failed: 0,
                cancelled: 0
            }
        )));
        assert!(batches.iter().any(|(b, _)| Some(*b) == second.batch));
    }

    #[tokio::test]
    async fn clear_finished_keeps_running_tasks() {
        // Arrange
        let f = fixture(Script::default(), small_config());
        f.orchestrator.submit(vec![file("a.txt", 3)], "");
        f.orchestrator.wait_idle().await;

        // Act
        f.orchestrator.clear_finished();
        f.orchestrator.flush().await;

        // Assert
        assert!(f.orchestrator.snapshot().tasks.is_empty());
        assert_eq!(f.history.list().len(), 1);
    }

    #[tokio::test]
    async fn whole_file_upload_reports_progress() {
        // Arrange
        let f = fixture(Script::default(), small_config());

        // Act
        let submission = f.orchestrator.submit(vec![file("notes.txt", 4)], "");
        f.orchestrator.wait_idle().await;

        // Assert
        let updates = f.recorder.updates_of(submission.tasks[0]);
        let progress: Vec<u8> = updates.iter().map(|t| t.progress).collect();
        assert_eq!(progress, vec![0, 0, 50, 100]);
        assert_eq!(updates[2].status, Status::Uploading);
        assert_eq!(updates[2].strategy, Some(Strategy::WholeFile));
    }

    #[tokio::test]
    async fn history_is_written_on_status_changes_only() {
        // Arrange
        let history = Arc::new(CountingHistory::default());
        let recorder = Arc::new(Recorder::default());
        let orchestrator = Orchestrator::new(
            Arc::new(ScriptedTransport::new(Script::default())),
            small_config(),
            history.clone(),
            recorder.clone(),
        );

        // Act
        let submission = orchestrator.submit(vec![file("big.bin", 15)], "");
        orchestrator.wait_idle().await;

        // Assert
        assert!(recorder.updates_of(submission.tasks[0]).len() > 3);
        assert_eq!(
            *history.writes.lock().unwrap(),
            vec![(Status::Pending, 0), (Status::Uploading, 0), (Status::Success, 100)]
        );
    }

    #[tokio::test]
    async fn failure_late_in_the_transfer_counts_as_nothing() {
        // Arrange
        let f = fixture(
            Script {
                chunk_replies: vec![(2, ChunkReply::Rejected("Unexpected response status: 503".to_owned()))],
                ..Script::default()
            },
            small_config(),
        );

        // Act
        let submission = f.orchestrator.submit(vec![file("big.bin", 15)], "");
        f.orchestrator.wait_idle().await;

        // Assert
        let snapshot = f.orchestrator.snapshot();
        let task = snapshot.tasks.iter().find(|t| t.id == submission.tasks[0]).unwrap();
        assert_eq!(task.status, Status::Error);
        assert_eq!(task.progress, 0);
        assert_eq!(snapshot.aggregate, 0);
        let progress: Vec<u8> = f
            .recorder
            .updates_of(submission.tasks[0])
            .iter()
            .map(|t| t.progress)
            .collect();
        assert_eq!(progress.iter().max(), Some(&67));
        assert_eq!(progress.last(), Some(&0));
    }
}
