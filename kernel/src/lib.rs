#![warn(clippy::unwrap_in_result)]
#![warn(clippy::unwrap_used)]

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod path;
pub mod range;

pub use path::{TargetPath, decode_object_id, encode_object_id, folders_of, sanitize_file_name};
pub use range::{ContentRange, RangeError, percent_of};

/// Content type used when the caller does not know better.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Opaque capability returned by the backend for a resumable upload.
///
/// The handle authorizes byte-range writes to exactly one destination key.
/// Clients never look inside it, they only hand it back to the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct SessionHandle(String);

impl SessionHandle {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Body of a request asking the server to open a resumable upload session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    /// Original file name, sanitized by the server
    #[serde(default)]
    pub filename: Option<String>,
    /// MIME type of the content, `application/octet-stream` when absent
    #[serde(default)]
    pub content_type: Option<String>,
    /// Total size of the file in bytes
    #[serde(default)]
    pub size: u64,
    /// Destination folder inside the bucket
    #[serde(default)]
    pub folder_name: Option<String>,
}

/// Reply to a successful session request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    /// Session handle to pass back with every chunk
    pub session_url: SessionHandle,
    /// Full object key the session writes to
    pub filename: String,
    pub success: bool,
}

/// Query parameters of a chunk write. `end` is exclusive.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChunkParams {
    pub session_url: String,
    pub start: u64,
    pub end: u64,
    pub total_size: u64,
}

impl ChunkParams {
    #[must_use]
    pub fn new(session: &SessionHandle, range: ContentRange) -> Self {
        Self {
            session_url: session.as_str().to_owned(),
            start: range.start(),
            end: range.end(),
            total_size: range.total(),
        }
    }
}

/// Reply to an accepted chunk.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChunkResponse {
    /// Whether the backend confirmed receipt of the whole object
    pub done: bool,
    /// Upload progress in percent, 0 to 100
    pub progress: u8,
    pub success: bool,
}

/// Metadata of an object stored in the bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInfo {
    /// Base64 of the object key, usable in `/objects/{id}`
    pub id: String,
    /// Last path segment of the key
    pub name: String,
    /// Full object key
    pub path: String,
    /// Size in bytes
    pub size: u64,
    pub content_type: String,
    /// RFC 3339 creation time
    pub created_at: String,
    /// RFC 3339 time of the last update
    pub updated_at: String,
    /// Bucket the object lives in
    pub bucket: String,
    /// Backend checksum of the content (BLAKE3 for the local bucket, MD5 for GCS)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl ObjectInfo {
    /// Last segment of an object key.
    #[must_use]
    pub fn name_of(path: &str) -> &str {
        match path.rfind(&['\\', '/']) {
            Some(ix) => &path[ix + 1..],
            None => path,
        }
    }
}

/// Reply to a whole-file upload.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    pub success: bool,
    /// Object key the file was stored under
    pub path: String,
    pub metadata: ObjectInfo,
}

/// Outcome of one file inside a bulk upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BulkStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BulkUploadResult {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub status: BulkStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Reply to a bulk upload. Individual files may fail while the request succeeds.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BulkUploadResponse {
    pub success: bool,
    pub total_files: usize,
    pub results: Vec<BulkUploadResult>,
}

/// Error body returned by every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: impl ToString) -> Self {
        self.details = Some(details.to_string());
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct DeleteResponse {
    pub success: bool,
}

/// Link the browser can follow to fetch an object.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DownloadLink {
    pub url: String,
}

/// Non-secret diagnostics about the configured backend.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Backend kind, `local` or `gcs`
    pub backend: String,
    /// Bound bucket, `None` when the server is misconfigured
    pub bucket: Option<String>,
    /// Whether listing the bucket currently works
    pub can_list_files: bool,
}
