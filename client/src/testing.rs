//! Scripted [`Transport`] for exercising the upload engine without a server.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use kernel::{ContentRange, SessionHandle, TargetPath};
use tokio::sync::Notify;

use crate::error::UploadError;
use crate::transport::{ChunkReply, Transport, WholeProgress};

/// Pauses a request until the test lets it go.
#[derive(Default)]
pub struct Gate {
    reached: Notify,
    release: Notify,
}

impl Gate {
    pub async fn wait_reached(&self) {
        self.reached.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }

    async fn pass(&self) {
        self.reached.notify_one();
        self.release.notified().await;
    }
}

#[derive(Default, Clone)]
pub struct Script {
    pub fail_sessions: bool,
    /// Replies replacing the correct one, by chunk ordinal within a session.
    pub chunk_replies: Vec<(usize, ChunkReply)>,
    pub fail_whole: bool,
    /// Holds the chunk with this ordinal before replying.
    pub hold_chunk: Option<(usize, Arc<Gate>)>,
    pub hold_whole: Option<Arc<Gate>>,
    pub whole_delay: Option<Duration>,
}

#[derive(Default)]
struct Log {
    sessions: usize,
    content_types: Vec<String>,
    chunks: Vec<(String, ContentRange)>,
    wholes: Vec<String>,
    in_flight: HashMap<String, usize>,
    max_in_flight_per_session: usize,
    active: usize,
    max_active: usize,
}

pub struct ScriptedTransport {
    script: Script,
    log: Mutex<Log>,
}

impl ScriptedTransport {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            log: Mutex::default(),
        }
    }

    pub fn session_requests(&self) -> usize {
        self.log.lock().unwrap().sessions
    }

    pub fn content_types(&self) -> Vec<String> {
        self.log.lock().unwrap().content_types.clone()
    }

    /// `(start, end)` of every chunk write in send order, `end` exclusive.
    pub fn chunk_ranges(&self) -> Vec<(u64, u64)> {
        self.log
            .lock()
            .unwrap()
            .chunks
            .iter()
            .map(|(_, r)| (r.start(), r.end()))
            .collect()
    }

    pub fn whole_uploads(&self) -> Vec<String> {
        self.log.lock().unwrap().wholes.clone()
    }

    pub fn max_in_flight_per_session(&self) -> usize {
        self.log.lock().unwrap().max_in_flight_per_session
    }

    pub fn max_active(&self) -> usize {
        self.log.lock().unwrap().max_active
    }

    fn begin(&self) {
        let mut log = self.log.lock().unwrap();
        log.active += 1;
        log.max_active = log.max_active.max(log.active);
    }

    fn end(&self) {
        let mut log = self.log.lock().unwrap();
        log.active -= 1;
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open_session(
        &self,
        _target: &TargetPath,
        content_type: &str,
        _size: u64,
    ) -> Result<SessionHandle, UploadError> {
        let n = {
            let mut log = self.log.lock().unwrap();
            log.sessions += 1;
            log.content_types.push(content_type.to_owned());
            log.sessions
        };
        if self.script.fail_sessions {
            return Err(UploadError::SessionInit(
                "No bucket specified and no default bucket configured".to_owned(),
            ));
        }
        Ok(SessionHandle::new(format!("session-{n}")))
    }

    async fn write_chunk(&self, session: &SessionHandle, range: ContentRange, data: Bytes) -> ChunkReply {
        let key = session.as_str().to_owned();
        let ordinal = {
            let mut log = self.log.lock().unwrap();
            let ordinal = log.chunks.iter().filter(|(s, _)| *s == key).count();
            log.chunks.push((key.clone(), range));
            let in_flight = {
                let n = log.in_flight.entry(key.clone()).or_default();
                *n += 1;
                *n
            };
            log.max_in_flight_per_session = log.max_in_flight_per_session.max(in_flight);
            ordinal
        };
        self.begin();
        assert_eq!(data.len() as u64, range.len());

        if let Some((n, gate)) = &self.script.hold_chunk {
            if *n == ordinal {
                gate.pass().await;
            }
        }
        tokio::task::yield_now().await;

        let reply = self
            .script
            .chunk_replies
            .iter()
            .find(|(n, _)| *n == ordinal)
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| {
                if range.is_final() {
                    ChunkReply::Complete
                } else {
                    ChunkReply::Partial(range.percent())
                }
            });

        self.end();
        if let Some(n) = self.log.lock().unwrap().in_flight.get_mut(&key) {
            *n -= 1;
        }
        reply
    }

    async fn upload_whole(
        &self,
        target: &TargetPath,
        _content_type: &str,
        _data: Bytes,
        progress: WholeProgress,
    ) -> Result<(), UploadError> {
        self.log.lock().unwrap().wholes.push(target.key());
        self.begin();
        progress(50);
        if let Some(gate) = &self.script.hold_whole {
            gate.pass().await;
        }
        if let Some(delay) = self.script.whole_delay {
            tokio::time::sleep(delay).await;
        }
        self.end();
        if self.script.fail_whole {
            return Err(UploadError::WholeFile("Upload failed: disk full".to_owned()));
        }
        Ok(())
    }
}
