use thiserror::Error;

/// Storage backend errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("No bucket specified and no default bucket configured")]
    NoBucket,

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid object path: {0}")]
    InvalidPath(String),

    #[error("upload session error: {0}")]
    Session(String),

    #[error("backend replied {status}: {body}")]
    Backend { status: u16, body: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid backend URL: {0}")]
    Url(#[from] url::ParseError),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that stop the server from starting or serving.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
