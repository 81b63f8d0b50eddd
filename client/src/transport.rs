use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, Stream};
use kernel::{
    percent_of, ChunkParams, ChunkResponse, ContentRange, ErrorResponse, SessionHandle, SessionRequest,
    SessionResponse, TargetPath,
};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};

use crate::error::{ClientError, UploadError};
use crate::resource::Resource;

/// Longest a single request may take before it counts as failed.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Slice handed to the HTTP body at a time during a whole-file upload.
const BODY_SLICE: usize = 64 * 1024;

/// Receives the percent of a whole-file body handed to the connection.
pub type WholeProgress = Arc<dyn Fn(u8) + Send + Sync>;

/// Server's answer to one byte-range write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkReply {
    /// Backend confirmed it holds the whole file.
    Complete,
    /// Range stored, more expected. Carries the server's percent.
    Partial(u8),
    /// Anything else, with the reason.
    Rejected(String),
}

/// Requests the upload engine makes. Implemented over HTTP and by test doubles.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open_session(
        &self,
        target: &TargetPath,
        content_type: &str,
        size: u64,
    ) -> Result<SessionHandle, UploadError>;

    /// Never fails: transport errors become [`ChunkReply::Rejected`].
    async fn write_chunk(&self, session: &SessionHandle, range: ContentRange, data: Bytes) -> ChunkReply;

    /// `progress` is called as the body goes out, ending at 100 before the reply arrives.
    async fn upload_whole(
        &self,
        target: &TargetPath,
        content_type: &str,
        data: Bytes,
        progress: WholeProgress,
    ) -> Result<(), UploadError>;
}

/// [`Transport`] talking to the filedeck server.
pub struct HttpTransport {
    client: Client,
    base: Resource,
}

impl HttpTransport {
    pub fn new(uri: &str) -> Result<Self, ClientError> {
        Self::with_timeout(uri, DEFAULT_REQUEST_TIMEOUT)
    }

    /// A request still unanswered after `timeout` fails, a stalled range becomes [`ChunkReply::Rejected`].
    pub fn with_timeout(uri: &str, timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base: Resource::new(uri)?,
        })
    }
}

/// Splits `data` into slices, reporting how much was handed out after each one.
pub(crate) fn counted_body(
    data: Bytes,
    progress: WholeProgress,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    let total = data.len() as u64;
    stream::unfold((data, 0u64, progress), move |(mut rest, sent, progress)| async move {
        if rest.is_empty() {
            return None;
        }
        let slice = rest.split_to(rest.len().min(BODY_SLICE));
        let sent = sent + slice.len() as u64;
        progress(percent_of(sent, total));
        Some((Ok(slice), (rest, sent, progress)))
    })
}

/// Best description of a failed reply: the API's error body, else the status line.
pub(crate) async fn failure_reason(response: Response) -> String {
    let status = response.status();
    match response.json::<ErrorResponse>().await {
        Ok(ErrorResponse {
            error,
            details: Some(details),
        }) => format!("{error}: {details}"),
        Ok(ErrorResponse { error, details: None }) => error,
        Err(_) => format!("Unexpected response status: {}", status.as_u16()),
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open_session(
        &self,
        target: &TargetPath,
        content_type: &str,
        size: u64,
    ) -> Result<SessionHandle, UploadError> {
        let request = SessionRequest {
            filename: Some(target.file_name().to_owned()),
            content_type: Some(content_type.to_owned()),
            size,
            folder_name: Some(target.folder().to_owned()),
        };
        let response = self
            .client
            .post(self.base.join("upload-session").url())
            .json(&request)
            .send()
            .await
            .map_err(|e| UploadError::SessionInit(e.to_string()))?;
        if !response.status().is_success() {
            return Err(UploadError::SessionInit(failure_reason(response).await));
        }
        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| UploadError::SessionInit(e.to_string()))?;
        if session.session_url.as_str().is_empty() {
            return Err(UploadError::SessionInit("No session URL returned".to_owned()));
        }
        Ok(session.session_url)
    }

    async fn write_chunk(&self, session: &SessionHandle, range: ContentRange, data: Bytes) -> ChunkReply {
        let params = ChunkParams::new(session, range);
        let sent = self
            .client
            .put(self.base.join("upload-session").url())
            .query(&params)
            .body(data)
            .send()
            .await;
        let response = match sent {
            Ok(r) => r,
            Err(e) => return ChunkReply::Rejected(e.to_string()),
        };
        if !response.status().is_success() {
            return ChunkReply::Rejected(failure_reason(response).await);
        }
        match response.json::<ChunkResponse>().await {
            Ok(ChunkResponse { success: false, .. }) => {
                ChunkReply::Rejected("server reported failure".to_owned())
            }
            Ok(ChunkResponse { done: true, .. }) => ChunkReply::Complete,
            Ok(ChunkResponse { progress, .. }) => ChunkReply::Partial(progress),
            Err(e) => ChunkReply::Rejected(e.to_string()),
        }
    }

    async fn upload_whole(
        &self,
        target: &TargetPath,
        content_type: &str,
        data: Bytes,
        progress: WholeProgress,
    ) -> Result<(), UploadError> {
        let len = data.len() as u64;
        let body = reqwest::Body::wrap_stream(counted_body(data, progress));
        let part = Part::stream_with_length(body, len)
            .file_name(target.file_name().to_owned())
            .mime_str(content_type)
            .map_err(|e| UploadError::WholeFile(e.to_string()))?;
        let form = Form::new()
            .text("folderName", target.folder().to_owned())
            .part("file", part);

        let response = self
            .client
            .post(self.base.join("upload").url())
            .multipart(form)
            .send()
            .await
            .map_err(|e| UploadError::WholeFile(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(UploadError::WholeFile(failure_reason(response).await))
        }
    }
}
