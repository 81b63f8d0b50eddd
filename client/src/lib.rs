//! Upload engine and request helpers for the filedeck service.
//!
//! Large files go through a resumable session range by range, small ones in one
//! multipart request. [`Orchestrator`] runs many of them concurrently and
//! reports progress, batch completion and history.

use comfy_table::{presets::UTF8_HORIZONTAL_ONLY, Attribute, Cell, ContentArrangement, Table};
use kernel::{DeleteResponse, DownloadLink, ObjectInfo, StorageConfig};
use reqwest::{Client, Response};
use resource::Resource;
use serde::de::DeserializeOwned;

pub mod error;
pub mod event;
pub mod history;
pub mod negotiator;
pub mod orchestrator;
pub mod resource;
pub mod source;
pub mod task;
pub mod transmitter;
pub mod transport;

#[cfg(test)]
mod testing;

pub use error::{ClientError, UploadError};
pub use event::{BatchSummary, NoopObserver, Snapshot, TaskEvent, UploadObserver};
pub use history::{HistoryEntry, HistorySink, JsonFileHistory, MemoryHistory, HISTORY_CAPACITY};
pub use orchestrator::{Orchestrator, OrchestratorConfig, Submission};
pub use source::{human_size, SourceFile};
pub use task::{BatchId, Status, Strategy, TaskId, TaskView};
pub use transmitter::DEFAULT_CHUNK_SIZE;
pub use transport::{ChunkReply, HttpTransport, Transport, DEFAULT_REQUEST_TIMEOUT};

/// Everything besides uploads: listing, deleting and download links.
pub struct Api {
    client: Client,
    base: Resource,
}

impl Api {
    pub fn new(uri: &str) -> Result<Self, ClientError> {
        Ok(Self {
            client: Client::builder().timeout(DEFAULT_REQUEST_TIMEOUT).build()?,
            base: Resource::new(uri)?,
        })
    }

    pub async fn folders(&self) -> Result<Vec<String>, ClientError> {
        let resource = self.base.join("folders/list");
        let response = self.client.get(resource.url()).send().await?;
        read_json(response).await
    }

    /// Objects whose key starts with `prefix`, ordered by key.
    pub async fn files(&self, prefix: &str) -> Result<Vec<ObjectInfo>, ClientError> {
        let resource = self.base.join("files");
        let response = self
            .client
            .get(resource.url())
            .query(&[("prefix", prefix)])
            .send()
            .await?;
        read_json(response).await
    }

    pub async fn delete(&self, key: &str) -> Result<(), ClientError> {
        let resource = self
            .base
            .join("objects")
            .segment(&kernel::encode_object_id(key));
        let response = self.client.delete(resource.url()).send().await?;
        let _: DeleteResponse = read_json(response).await?;
        Ok(())
    }

    /// Link to fetch `key` with. Relative links are resolved against the server address.
    pub async fn download_link(&self, key: &str) -> Result<String, ClientError> {
        let resource = self.base.join("download");
        let response = self
            .client
            .get(resource.url())
            .query(&[("path", key)])
            .send()
            .await?;
        let link: DownloadLink = read_json(response).await?;
        if link.url.starts_with('/') {
            let absolute = self
                .base
                .url()
                .join(&link.url)
                .map_err(|e| ClientError::InvalidUri(format!("{}: {e}", link.url)))?;
            return Ok(absolute.to_string());
        }
        Ok(link.url)
    }

    pub async fn storage_config(&self) -> Result<StorageConfig, ClientError> {
        let resource = self.base.join("storage/config");
        let response = self.client.get(resource.url()).send().await?;
        read_json(response).await
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    Err(ClientError::Status {
        status: status.as_u16(),
        message: transport::failure_reason(response).await,
    })
}

fn new_table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_HORIZONTAL_ONLY)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(120)
        .set_header(
            header
                .iter()
                .map(|h| Cell::new(h).add_attribute(Attribute::Bold)),
        );
    table
}

#[must_use]
pub fn folders_table(folders: &[String]) -> Table {
    let mut table = new_table(&["Folder"]);
    for folder in folders {
        table.add_row(vec![Cell::new(folder)]);
    }
    table
}

#[must_use]
pub fn files_table(files: &[ObjectInfo]) -> Table {
    let mut table = new_table(&["Path", "Size", "Type", "Updated"]);
    for f in files {
        table.add_row(vec![
            Cell::new(&f.path),
            Cell::new(human_size(f.size)),
            Cell::new(&f.content_type),
            Cell::new(&f.updated_at),
        ]);
    }
    table
}

#[must_use]
pub fn history_table(entries: &[HistoryEntry]) -> Table {
    let mut table = new_table(&["File", "Folder", "Size", "Status", "Progress", "Time", "Error"]);
    for e in entries {
        table.add_row(vec![
            Cell::new(&e.file_name),
            Cell::new(&e.folder),
            Cell::new(human_size(e.file_size)),
            Cell::new(e.status),
            Cell::new(format!("{}%", e.progress)),
            Cell::new(e.timestamp.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(e.error.as_deref().unwrap_or_default()),
        ]);
    }
    table
}
