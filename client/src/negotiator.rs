use kernel::{SessionHandle, TargetPath, DEFAULT_CONTENT_TYPE};

use crate::error::UploadError;
use crate::transport::Transport;

/// Asks the backend for a resumable upload session covering `target`.
///
/// An empty target never reaches the network. Every other failure is
/// [`UploadError::SessionInit`], which callers answer by uploading the whole file instead.
pub async fn open_session(
    transport: &dyn Transport,
    target: &TargetPath,
    content_type: Option<&str>,
    size: u64,
) -> Result<SessionHandle, UploadError> {
    if target.is_empty() {
        return Err(UploadError::Validation(format!(
            "cannot open a session for an empty file name in '{}'",
            target.folder()
        )));
    }
    let content_type = content_type
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(DEFAULT_CONTENT_TYPE);

    let session = transport.open_session(target, content_type, size).await?;
    tracing::debug!("session for {target} opened");
    Ok(session)
}
