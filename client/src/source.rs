use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use kernel::{ContentRange, DEFAULT_CONTENT_TYPE};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

#[derive(Debug, Clone)]
enum Origin {
    Disk(PathBuf),
    Memory(Bytes),
}

/// Content of one file selected for upload. Size is fixed when the file is picked.
#[derive(Debug, Clone)]
pub struct SourceFile {
    name: String,
    size: u64,
    content_type: String,
    origin: Origin,
}

impl SourceFile {
    pub async fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        let meta = tokio::fs::metadata(path).await?;
        if !meta.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a file", path.display()),
            ));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            content_type: content_type_of(&name).to_owned(),
            name,
            size: meta.len(),
            origin: Origin::Disk(path.to_path_buf()),
        })
    }

    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let name = name.into();
        let data = data.into();
        Self {
            content_type: content_type_of(&name).to_owned(),
            size: data.len() as u64,
            name,
            origin: Origin::Memory(data),
        }
    }

    /// Overrides the content type guessed from the file extension.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Pretends the file has `size` bytes without holding them, for exercising size limits.
    #[cfg(test)]
    pub(crate) fn sized(name: &str, size: u64) -> Self {
        Self {
            content_type: content_type_of(name).to_owned(),
            name: name.to_owned(),
            size,
            origin: Origin::Memory(Bytes::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Reads exactly the bytes of `range`; only that range is held in memory.
    pub async fn read_range(&self, range: ContentRange) -> io::Result<Bytes> {
        match &self.origin {
            Origin::Memory(data) => {
                let (start, end) = (to_index(range.start())?, to_index(range.end())?);
                if end > data.len() {
                    return Err(io::ErrorKind::UnexpectedEof.into());
                }
                Ok(data.slice(start..end))
            }
            Origin::Disk(path) => {
                let mut file = File::open(path).await?;
                file.seek(SeekFrom::Start(range.start())).await?;
                let mut data = vec![0; to_index(range.len())?];
                file.read_exact(&mut data).await?;
                Ok(Bytes::from(data))
            }
        }
    }

    pub async fn read_all(&self) -> io::Result<Bytes> {
        match &self.origin {
            Origin::Memory(data) => Ok(data.clone()),
            Origin::Disk(path) => Ok(Bytes::from(tokio::fs::read(path).await?)),
        }
    }
}

fn to_index(offset: u64) -> io::Result<usize> {
    usize::try_from(offset).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

/// Best effort MIME type from the file extension.
pub fn content_type_of(name: &str) -> &'static str {
    mime_guess::from_path(name)
        .first_raw()
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}

/// Size as shown to people: `512 bytes`, `1.5 KB`, `250.0 MB`.
pub fn human_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    #[allow(clippy::cast_precision_loss)]
    let value = bytes as f64;
    match bytes {
        b if b < KB => format!("{b} bytes"),
        b if b < MB => format!("{:.1} KB", value / KB as f64),
        b if b < GB => format!("{:.1} MB", value / MB as f64),
        _ => format!("{:.1} GB", value / GB as f64),
    }
}
