use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use kernel::{ContentRange, ObjectInfo, SessionHandle, encode_object_id};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use uuid::Uuid;

use crate::domain::{BackendInfo, RangeAck, Storage};
use crate::error::{StorageError, StorageResult};

const DB_FILE: &str = "index.db";
const OBJECTS_DIR: &str = "objects";
const SESSIONS_DIR: &str = "sessions";
const CACHE_SIZE: &str = "4096";
const HASH_BUFFER: usize = 64 * 1024;

const OBJECT_COLUMNS: &str = "path, content_type, size, blake3_hash, created, updated";

/// Bucket kept on the local filesystem.
///
/// Object bytes live under `<data_dir>/<bucket>/objects`, in-progress
/// resumable uploads under `<data_dir>/<bucket>/sessions`, and an SQLite
/// index next to them tracks object metadata and session offsets.
pub struct LocalBucket {
    bound: Option<Bound>,
}

struct Bound {
    name: String,
    objects: PathBuf,
    sessions: PathBuf,
    conn: Mutex<Connection>,
}

struct SessionRow {
    path: String,
    content_type: String,
    received: u64,
    total: Option<u64>,
}

impl LocalBucket {
    /// Opens (or creates) the bucket directory. Without a bucket name the
    /// backend stays unbound and every operation fails with [`StorageError::NoBucket`].
    pub fn open<P: AsRef<Path>>(data_dir: P, bucket: Option<&str>) -> StorageResult<Self> {
        let Some(name) = bucket.map(str::trim).filter(|b| !b.is_empty()) else {
            tracing::warn!("no bucket configured, uploads will fail");
            return Ok(Self { bound: None });
        };
        if name.contains(&['/', '\\'][..]) || name == "." || name == ".." {
            return Err(StorageError::InvalidPath(name.to_owned()));
        }

        let root = data_dir.as_ref().join(name);
        let objects = root.join(OBJECTS_DIR);
        let sessions = root.join(SESSIONS_DIR);
        std::fs::create_dir_all(&objects)?;
        std::fs::create_dir_all(&sessions)?;

        let conn = Connection::open(root.join(DB_FILE))?;
        new_database(&conn)?;
        tracing::info!("local bucket '{name}' opened at {}", root.display());

        Ok(Self {
            bound: Some(Bound {
                name: name.to_owned(),
                objects,
                sessions,
                conn: Mutex::new(conn),
            }),
        })
    }

    fn bound(&self) -> StorageResult<&Bound> {
        self.bound.as_ref().ok_or(StorageError::NoBucket)
    }
}

fn new_database(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "encoding", "UTF-8")?;
    conn.pragma_update(None, "cache_size", CACHE_SIZE)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS object (
              path          TEXT PRIMARY KEY,
              content_type  TEXT NOT NULL,
              size          INTEGER NOT NULL,
              blake3_hash   TEXT NOT NULL,
              created       TEXT NOT NULL,
              updated       TEXT NOT NULL
              )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS session (
              id            TEXT PRIMARY KEY,
              path          TEXT NOT NULL,
              content_type  TEXT NOT NULL,
              received      INTEGER NOT NULL,
              total         INTEGER,
              created       TEXT NOT NULL
              )",
        [],
    )?;

    Ok(())
}

impl Bound {
    fn with_db<R>(&self, action: impl FnOnce(&Connection) -> rusqlite::Result<R>) -> StorageResult<R> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| io::Error::other("bucket index lock poisoned"))?;
        Ok(action(&conn)?)
    }

    /// Maps an object key onto the filesystem, refusing anything that could escape the bucket.
    fn object_path(&self, key: &str) -> StorageResult<PathBuf> {
        let invalid = || StorageError::InvalidPath(key.to_owned());
        if key.is_empty() || key.starts_with('/') || key.contains('\\') {
            return Err(invalid());
        }
        let mut path = self.objects.clone();
        for segment in key.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(invalid());
            }
            path.push(segment);
        }
        Ok(path)
    }

    fn staging_path(&self, session: &str) -> PathBuf {
        self.sessions.join(format!("{session}.part"))
    }

    fn find_object(&self, key: &str) -> StorageResult<ObjectInfo> {
        let bucket = self.name.clone();
        let found = self.with_db(|conn| {
            conn.query_row(
                &format!("SELECT {OBJECT_COLUMNS} FROM object WHERE path = ?1"),
                params![key],
                |row| object_from_row(&bucket, row),
            )
            .optional()
        })?;
        found.ok_or_else(|| StorageError::NotFound(key.to_owned()))
    }

    fn save_object(&self, key: &str, content_type: &str, size: u64, hash: &str) -> StorageResult<ObjectInfo> {
        let now = chrono::Utc::now().to_rfc3339();
        let size = i64::try_from(size).unwrap_or(i64::MAX);
        self.with_db(|conn| {
            conn.execute(
                "INSERT INTO object (path, content_type, size, blake3_hash, created, updated)
                      VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(path) DO UPDATE SET
                      content_type = excluded.content_type,
                      size = excluded.size,
                      blake3_hash = excluded.blake3_hash,
                      updated = excluded.updated",
                params![key, content_type, size, hash, now],
            )
        })?;
        self.find_object(key)
    }

    fn find_session(&self, id: &str) -> StorageResult<Option<SessionRow>> {
        self.with_db(|conn| {
            conn.query_row(
                "SELECT path, content_type, received, total FROM session WHERE id = ?1",
                params![id],
                |row| {
                    let received: i64 = row.get(2)?;
                    let total: Option<i64> = row.get(3)?;
                    Ok(SessionRow {
                        path: row.get(0)?,
                        content_type: row.get(1)?,
                        received: u64::try_from(received).unwrap_or_default(),
                        total: total.and_then(|t| u64::try_from(t).ok()),
                    })
                },
            )
            .optional()
        })
    }
}

fn object_from_row(bucket: &str, row: &Row<'_>) -> rusqlite::Result<ObjectInfo> {
    let path: String = row.get(0)?;
    let size: i64 = row.get(2)?;
    Ok(ObjectInfo {
        id: encode_object_id(&path),
        name: ObjectInfo::name_of(&path).to_owned(),
        size: u64::try_from(size).unwrap_or_default(),
        content_type: row.get(1)?,
        checksum: Some(row.get(3)?),
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        bucket: bucket.to_owned(),
        path,
    })
}

async fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0; HASH_BUFFER];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

async fn ensure_parent(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

#[async_trait]
impl Storage for LocalBucket {
    fn describe(&self) -> BackendInfo {
        BackendInfo {
            kind: "local",
            bucket: self.bound.as_ref().map(|b| b.name.clone()),
        }
    }

    async fn create_session(&self, path: &str, content_type: &str) -> StorageResult<SessionHandle> {
        let bound = self.bound()?;
        bound.object_path(path)?;

        let id = Uuid::new_v4().to_string();
        tokio::fs::File::create(bound.staging_path(&id)).await?;

        let now = chrono::Utc::now().to_rfc3339();
        bound.with_db(|conn| {
            conn.execute(
                "INSERT INTO session (id, path, content_type, received, total, created)
                      VALUES (?1, ?2, ?3, 0, NULL, ?4)",
                params![&id, path, content_type, now],
            )
        })?;
        tracing::info!("upload session {id} opened for {path}");

        Ok(SessionHandle::new(id))
    }

    async fn write_range(
        &self,
        session: &SessionHandle,
        range: ContentRange,
        data: Bytes,
    ) -> StorageResult<RangeAck> {
        let bound = self.bound()?;
        let id = session.as_str();
        let Some(state) = bound.find_session(id)? else {
            return Ok(RangeAck::Rejected(format!("upload session {id} not found")));
        };

        if range.start() != state.received {
            return Ok(RangeAck::Rejected(format!(
                "{range} does not continue at byte {}",
                state.received
            )));
        }
        if state.total.is_some_and(|total| total != range.total()) {
            return Ok(RangeAck::Rejected(format!(
                "{range} changes the total size of the upload"
            )));
        }
        if data.len() as u64 != range.len() {
            return Ok(RangeAck::Rejected(format!(
                "{range} carries {} bytes",
                data.len()
            )));
        }

        let staging = bound.staging_path(id);
        let mut file = tokio::fs::OpenOptions::new().write(true).open(&staging).await?;
        // drop whatever a failed earlier attempt may have left past the confirmed offset
        file.set_len(state.received).await?;
        file.seek(SeekFrom::Start(state.received)).await?;
        file.write_all(&data).await?;
        file.flush().await?;
        drop(file);

        if !range.is_final() {
            let received = i64::try_from(range.end()).unwrap_or(i64::MAX);
            let total = i64::try_from(range.total()).unwrap_or(i64::MAX);
            bound.with_db(|conn| {
                conn.execute(
                    "UPDATE session SET received = ?2, total = ?3 WHERE id = ?1",
                    params![id, received, total],
                )
            })?;
            tracing::debug!("session {id}: {range} accepted");
            return Ok(RangeAck::Partial);
        }

        let target = bound.object_path(&state.path)?;
        ensure_parent(&target).await?;
        let hash = hash_file(&staging).await?;
        tokio::fs::rename(&staging, &target).await?;
        bound.save_object(&state.path, &state.content_type, range.total(), &hash)?;
        bound.with_db(|conn| conn.execute("DELETE FROM session WHERE id = ?1", params![id]))?;
        tracing::info!("session {id}: {} complete ({} bytes)", state.path, range.total());

        Ok(RangeAck::Complete)
    }

    async fn upload(&self, path: &str, content_type: &str, data: Bytes) -> StorageResult<ObjectInfo> {
        let bound = self.bound()?;
        let target = bound.object_path(path)?;
        ensure_parent(&target).await?;
        tokio::fs::write(&target, &data).await?;
        let hash = blake3::hash(&data).to_hex().to_string();
        bound.save_object(path, content_type, data.len() as u64, &hash)
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        let bound = self.bound()?;
        let target = bound.object_path(path)?;
        bound.find_object(path)?;

        match tokio::fs::remove_file(&target).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!("object {path} had no content on disk");
            }
            Err(e) => return Err(e.into()),
        }
        bound.with_db(|conn| conn.execute("DELETE FROM object WHERE path = ?1", params![path]))?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>> {
        let bound = self.bound()?;
        let bucket = bound.name.clone();
        bound.with_db(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {OBJECT_COLUMNS} FROM object
                  WHERE substr(path, 1, length(?1)) = ?1
                  ORDER BY path"
            ))?;
            let rows = stmt.query_map(params![prefix], |row| object_from_row(&bucket, row))?;
            rows.collect()
        })
    }

    async fn read(&self, path: &str) -> StorageResult<(ObjectInfo, Bytes)> {
        let bound = self.bound()?;
        let target = bound.object_path(path)?;
        let info = bound.find_object(path)?;
        let data = tokio::fs::read(&target).await?;
        Ok((info, Bytes::from(data)))
    }

    async fn download_url(&self, path: &str) -> StorageResult<Option<String>> {
        self.bound()?.find_object(path)?;
        Ok(None)
    }
}
