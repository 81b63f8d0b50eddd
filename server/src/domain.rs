use async_trait::async_trait;
use bytes::Bytes;
use kernel::{ContentRange, ObjectInfo, SessionHandle};

use crate::error::StorageResult;

/// How the backend answered a byte-range write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeAck {
    /// The final range landed and the object is complete.
    Complete,
    /// The range was accepted, more ranges are expected.
    Partial,
    /// The backend refused the range.
    Rejected(String),
}

/// Identity of the configured backend, safe to show to clients.
#[derive(Debug, Clone)]
pub struct BackendInfo {
    pub kind: &'static str,
    pub bucket: Option<String>,
}

/// Object storage bucket the service proxies to.
///
/// Keys are already sanitized relative paths such as `docs/report.pdf`.
#[async_trait]
pub trait Storage: Send + Sync {
    fn describe(&self) -> BackendInfo;

    /// Registers a resumable upload for `path` and returns the capability to write it.
    async fn create_session(&self, path: &str, content_type: &str) -> StorageResult<SessionHandle>;

    /// Writes one contiguous range of a resumable upload.
    async fn write_range(
        &self,
        session: &SessionHandle,
        range: ContentRange,
        data: Bytes,
    ) -> StorageResult<RangeAck>;

    /// Stores a whole object in one go, replacing any previous content.
    async fn upload(&self, path: &str, content_type: &str, data: Bytes) -> StorageResult<ObjectInfo>;

    async fn delete(&self, path: &str) -> StorageResult<()>;

    /// Objects whose key starts with `prefix`, ordered by key.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>>;

    async fn read(&self, path: &str) -> StorageResult<(ObjectInfo, Bytes)>;

    /// Direct link to the object, `None` when it has to be served through this service.
    async fn download_url(&self, path: &str) -> StorageResult<Option<String>>;
}
