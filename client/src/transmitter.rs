use futures::stream::{self, Stream};
use kernel::{percent_of, ContentRange, SessionHandle};
use tokio_util::sync::CancellationToken;

use crate::error::UploadError;
use crate::source::SourceFile;
use crate::transport::{ChunkReply, Transport};

/// 5 MiB, the backend's preferred multiple for resumable uploads.
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Step of a chunked transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransmitEvent {
    /// A non-final range was accepted, `cursor` is the next byte to send.
    Progress { cursor: u64, percent: u8 },
    /// The final range was accepted and the backend confirmed completion.
    Complete,
    /// Cancellation was observed before sending the next range.
    Cancelled,
}

struct Transfer<'a> {
    transport: &'a dyn Transport,
    session: &'a SessionHandle,
    source: &'a SourceFile,
    chunk_size: u64,
    cancel: &'a CancellationToken,
    cursor: u64,
    finished: bool,
}

impl Transfer<'_> {
    async fn step(&mut self) -> Result<TransmitEvent, UploadError> {
        if self.cancel.is_cancelled() {
            self.finished = true;
            return Ok(TransmitEvent::Cancelled);
        }

        let size = self.source.size();
        let start = self.cursor;
        let end = start.saturating_add(self.chunk_size).min(size);
        let chunk_error = |reason: String| UploadError::ChunkUpload { start, end, reason };

        let range = ContentRange::new(start, end, size).map_err(|e| chunk_error(e.to_string()))?;
        let data = self.source.read_range(range).await?;
        let reply = self.transport.write_chunk(self.session, range, data).await;
        tracing::trace!("{range}: {reply:?}");

        match reply {
            ChunkReply::Complete if range.is_final() => {
                self.cursor = end;
                self.finished = true;
                Ok(TransmitEvent::Complete)
            }
            ChunkReply::Partial(_) if !range.is_final() => {
                self.cursor = end;
                Ok(TransmitEvent::Progress {
                    cursor: end,
                    percent: percent_of(end, size),
                })
            }
            ChunkReply::Complete => Err(chunk_error(
                "backend reported completion before the final range".to_owned(),
            )),
            ChunkReply::Partial(_) => Err(chunk_error(
                "backend did not confirm completion of the final range".to_owned(),
            )),
            ChunkReply::Rejected(reason) => Err(chunk_error(reason)),
        }
    }
}

/// Sends `source` range by range against `session`.
///
/// The stream is lazy: each poll reads one range, writes it and waits for the
/// reply, so ranges go out strictly in order with one in flight. It ends after
/// [`TransmitEvent::Complete`], [`TransmitEvent::Cancelled`] or the first error.
/// Progress is derived from the cursor, never from the server's reply.
pub fn transmit<'a>(
    transport: &'a dyn Transport,
    session: &'a SessionHandle,
    source: &'a SourceFile,
    chunk_size: u64,
    cancel: &'a CancellationToken,
) -> impl Stream<Item = Result<TransmitEvent, UploadError>> + Send + 'a {
    let transfer = Transfer {
        transport,
        session,
        source,
        chunk_size: chunk_size.max(1),
        cancel,
        cursor: 0,
        finished: false,
    };
    stream::unfold(transfer, |mut transfer| async move {
        if transfer.finished {
            return None;
        }
        let item = transfer.step().await;
        if item.is_err() {
            transfer.finished = true;
        }
        Some((item, transfer))
    })
}
