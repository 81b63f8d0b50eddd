use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use client::{
    BatchId, BatchSummary, DEFAULT_REQUEST_TIMEOUT, HISTORY_CAPACITY, HistorySink, HttpTransport,
    JsonFileHistory, MemoryHistory, Orchestrator, OrchestratorConfig, SourceFile, Status,
    TaskView, UploadObserver,
};

const MB: u64 = 1024 * 1024;

pub struct UploadParams {
    pub uri: String,
    pub files: Vec<PathBuf>,
    pub folder: String,
    /// MiB per range, server default when `None`
    pub chunk_size: Option<u64>,
    pub concurrency: Option<usize>,
    /// Seconds per request, [`DEFAULT_REQUEST_TIMEOUT`] when `None`
    pub timeout: Option<u64>,
    pub history: PathBuf,
}

/// Prints every task change as one line.
struct ConsoleObserver;

impl UploadObserver for ConsoleObserver {
    fn on_task_update(&self, task: &TaskView) {
        match (task.status, &task.error) {
            (Status::Pending, _) => println!("queued    {}", task.target),
            (Status::Uploading, _) => println!("{:>3}%      {}", task.progress, task.target),
            (Status::Success, _) => println!("uploaded  {}", task.target),
            (Status::Error, Some(e)) => println!("failed    {}: {e}", task.target),
            (Status::Error, None) => println!("failed    {}", task.target),
        }
    }

    fn on_batch_complete(&self, batch: BatchId, summary: &BatchSummary) {
        println!(
            "batch {batch} done: {} uploaded, {} failed, {} cancelled",
            summary.succeeded, summary.failed, summary.cancelled
        );
    }
}

fn open_history(params: &UploadParams) -> Arc<dyn HistorySink> {
    match JsonFileHistory::open(&params.history, HISTORY_CAPACITY) {
        Ok(h) => Arc::new(h),
        Err(e) => {
            eprintln!("{}: {e}, history kept in memory only", params.history.display());
            Arc::new(MemoryHistory::default())
        }
    }
}

pub async fn run(params: UploadParams) {
    let history = open_history(&params);
    let unfinished = history.unfinished();
    if !unfinished.is_empty() {
        println!("{} upload(s) from an earlier run never finished:", unfinished.len());
        println!("{}", client::history_table(&unfinished));
        println!("upload them again or run `history discard` to forget them");
    }

    let timeout = params.timeout.map_or(DEFAULT_REQUEST_TIMEOUT, Duration::from_secs);
    let transport = match HttpTransport::with_timeout(&params.uri, timeout) {
        Ok(t) => Arc::new(t),
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let mut sources = Vec::with_capacity(params.files.len());
    for path in &params.files {
        match SourceFile::open(path).await {
            Ok(source) => sources.push(source),
            Err(e) => eprintln!("{}: {e}", path.display()),
        }
    }
    if sources.is_empty() {
        eprintln!("nothing to upload");
        std::process::exit(1);
    }

    let mut config = OrchestratorConfig::default();
    if let Some(size) = params.chunk_size {
        config.chunk_size = size.max(1) * MB;
    }
    if let Some(n) = params.concurrency {
        config.max_concurrent = n;
    }

    let orchestrator = Orchestrator::new(transport, config, history, Arc::new(ConsoleObserver));
    let submission = orchestrator.submit(sources, &params.folder);
    if let Some(e) = &submission.rejected {
        eprintln!("{e}");
    }

    let interrupted = tokio::select! {
        () = orchestrator.wait_idle() => false,
        _ = tokio::signal::ctrl_c() => {
            println!("cancelling unfinished uploads");
            orchestrator.cancel_all();
            orchestrator.wait_idle().await;
            true
        }
    };

    let snapshot = orchestrator.snapshot();
    if !orchestrator.chunked_enabled() {
        tracing::warn!("resumable sessions were unavailable, files went up whole");
    }
    let statuses = snapshot.tasks.iter().map(|t| t.status);
    let code = exit_code(interrupted, statuses, submission.rejected.is_some());
    if code != 0 {
        std::process::exit(code);
    }
}

/// Zero only when nothing was interrupted or rejected and every task uploaded.
fn exit_code(interrupted: bool, statuses: impl IntoIterator<Item = Status>, rejected: bool) -> i32 {
    let all_uploaded = statuses.into_iter().all(|s| s == Status::Success);
    if interrupted || rejected || !all_uploaded {
        1
    } else {
        0
    }
}
