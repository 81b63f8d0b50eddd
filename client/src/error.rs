use thiserror::Error;

/// Why an upload task ended in `Error`, or why files never became tasks.
///
/// Cloned into task events, so lower level errors are kept as text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    /// Opening the resumable session failed. Switches the orchestrator to whole-file uploads.
    #[error("failed to open upload session: {0}")]
    SessionInit(String),

    /// A byte range was refused or answered unexpectedly. `end` is exclusive.
    #[error("chunk upload failed for bytes {start}..{end}: {reason}")]
    ChunkUpload { start: u64, end: u64, reason: String },

    #[error("upload failed: {0}")]
    WholeFile(String),

    /// Rejected before any request was made.
    #[error("{0}")]
    Validation(String),

    #[error("cannot read source file: {0}")]
    Io(String),
}

impl From<std::io::Error> for UploadError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Failures of the plain request helpers used by the CLI.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid server address: {0}")]
    InvalidUri(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server replied {status}: {message}")]
    Status { status: u16, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
