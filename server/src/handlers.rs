#![allow(clippy::unused_async)]
use std::io;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::{Stream, TryStreamExt};
use futures_util::StreamExt;
use kernel::{
    BulkStatus, BulkUploadResponse, BulkUploadResult, ChunkResponse, ContentRange, DeleteResponse,
    DownloadLink, ErrorResponse, ObjectInfo, SessionHandle, SessionRequest, SessionResponse,
    StorageConfig, TargetPath, UploadResponse, DEFAULT_CONTENT_TYPE,
};
use serde::Deserialize;
use tokio_util::io::StreamReader;
use utoipa::OpenApi;

use crate::domain::RangeAck;
use crate::error::StorageError;
use crate::file_reply::FileReply;
use crate::{ApiDoc, SharedStorage};

/// Query of a chunk write, parsed by hand so a bad value gets the API's error body.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkQuery {
    session_url: Option<String>,
    start: Option<String>,
    end: Option<String>,
    total_size: Option<String>,
}

impl ChunkQuery {
    fn range(&self) -> Option<ContentRange> {
        let parse = |v: &Option<String>| v.as_deref().and_then(|s| s.trim().parse::<u64>().ok());
        ContentRange::new(parse(&self.start)?, parse(&self.end)?, parse(&self.total_size)?).ok()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PrefixQuery {
    prefix: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PathQuery {
    path: Option<String>,
}

/// File received in a multipart form.
struct FormFile {
    name: String,
    content_type: String,
    data: Bytes,
}

/// Opens a resumable upload session for a file.
#[utoipa::path(
    post,
    path = "/upload-session",
    request_body = SessionRequest,
    responses(
        (status = 200, description = "Session opened", body = SessionResponse),
        (status = 400, description = "Filename missing", body = ErrorResponse),
        (status = 500, description = "Backend refused the session", body = ErrorResponse)
    ),
    tag = "uploads",
)]
pub async fn create_session(
    State(storage): State<SharedStorage>,
    Json(request): Json<SessionRequest>,
) -> Response {
    let Some(filename) = request.filename.as_deref().filter(|f| !f.trim().is_empty()) else {
        return bad_request("Filename is required");
    };
    let target = TargetPath::new(request.folder_name.as_deref().unwrap_or_default(), filename);
    if target.is_empty() {
        return bad_request("Filename is required");
    }
    let content_type = request
        .content_type
        .as_deref()
        .filter(|c| !c.is_empty())
        .unwrap_or(DEFAULT_CONTENT_TYPE);
    let key = target.key();

    tracing::info!("session for {key} ({} bytes, {content_type})", request.size);
    match storage.create_session(&key, content_type).await {
        Ok(session_url) => Json(SessionResponse {
            session_url,
            filename: key,
            success: true,
        })
        .into_response(),
        Err(e) => storage_failure("Failed to create upload session", &e),
    }
}

/// Writes one byte range of a resumable upload. `end` is exclusive.
#[utoipa::path(
    put,
    path = "/upload-session",
    request_body(content = Vec<u8>, content_type = "application/octet-stream"),
    params(
        ("sessionUrl" = String, Query, description = "Session handle returned by POST /upload-session"),
        ("start" = u64, Query, description = "First byte of the range"),
        ("end" = u64, Query, description = "Byte after the last one of the range"),
        ("totalSize" = u64, Query, description = "Size of the whole file"),
    ),
    responses(
        (status = 200, description = "Range accepted", body = ChunkResponse),
        (status = 400, description = "Missing or invalid parameters", body = ErrorResponse),
        (status = 500, description = "Backend rejected the range", body = ErrorResponse)
    ),
    tag = "uploads",
)]
pub async fn upload_chunk(
    State(storage): State<SharedStorage>,
    Query(query): Query<ChunkQuery>,
    body: Bytes,
) -> Response {
    let Some(session) = query
        .session_url
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(SessionHandle::new)
    else {
        return bad_request("Session URL is required");
    };
    let Some(range) = query.range() else {
        return bad_request("Invalid chunk parameters");
    };
    if body.len() as u64 != range.len() {
        return failure(
            StatusCode::BAD_REQUEST,
            ErrorResponse::new("Invalid chunk parameters").with_details(format!(
                "{range} announces {} bytes, body has {}",
                range.len(),
                body.len()
            )),
        );
    }

    let start = Instant::now();
    let ack = storage.write_range(&session, range, body).await;
    tracing::debug!("{range} written in {:?}", start.elapsed());

    match ack {
        Ok(RangeAck::Complete) => Json(ChunkResponse {
            done: true,
            progress: 100,
            success: true,
        })
        .into_response(),
        Ok(RangeAck::Partial) => Json(ChunkResponse {
            done: false,
            progress: range.percent(),
            success: true,
        })
        .into_response(),
        Ok(RangeAck::Rejected(reason)) => {
            tracing::error!("{range} rejected: {reason}");
            internal_error(ErrorResponse::new("Failed to upload chunk").with_details(reason))
        }
        Err(e) => storage_failure("Failed to upload chunk", &e),
    }
}

/// Uploads a whole file from a multipart form.
#[utoipa::path(
    post,
    path = "/upload",
    request_body(content_type = "multipart/form-data", description = "`file` part and optional `folderName`"),
    responses(
        (status = 200, description = "File stored", body = UploadResponse),
        (status = 400, description = "No file in the form", body = ErrorResponse),
        (status = 500, description = "Backend error", body = ErrorResponse)
    ),
    tag = "uploads",
)]
pub async fn upload_file(State(storage): State<SharedStorage>, multipart: Multipart) -> Response {
    let (folder, files) = match read_form(multipart).await {
        Ok(form) => form,
        Err(e) => {
            tracing::error!("{e}");
            return bad_request_with("Malformed form", &e);
        }
    };
    let Some(file) = files.into_iter().next() else {
        return bad_request("No file provided");
    };

    match store(&storage, &folder, file).await {
        Ok(metadata) => Json(UploadResponse {
            success: true,
            path: metadata.path.clone(),
            metadata,
        })
        .into_response(),
        Err(e) => storage_failure("Upload failed", &e),
    }
}

/// Uploads several files from one multipart form, reporting each file separately.
#[utoipa::path(
    post,
    path = "/bulk-upload",
    request_body(content_type = "multipart/form-data", description = "repeated `files` parts and optional `folderName`"),
    responses(
        (status = 200, description = "Per file results", body = BulkUploadResponse),
        (status = 400, description = "No files in the form", body = ErrorResponse)
    ),
    tag = "uploads",
)]
pub async fn bulk_upload(State(storage): State<SharedStorage>, multipart: Multipart) -> Response {
    let (folder, files) = match read_form(multipart).await {
        Ok(form) => form,
        Err(e) => {
            tracing::error!("{e}");
            return bad_request_with("Malformed form", &e);
        }
    };
    if files.is_empty() {
        return bad_request("No files provided");
    }

    let mut results = Vec::with_capacity(files.len());
    for file in files {
        let name = file.name.clone();
        let result = match store(&storage, &folder, file).await {
            Ok(info) => BulkUploadResult {
                name,
                path: Some(info.path),
                size: Some(info.size),
                status: BulkStatus::Success,
                error: None,
            },
            Err(e) => {
                tracing::error!("file '{name}' not stored. Error: {e}");
                BulkUploadResult {
                    name,
                    path: None,
                    size: None,
                    status: BulkStatus::Error,
                    error: Some(e.to_string()),
                }
            }
        };
        results.push(result);
    }

    Json(BulkUploadResponse {
        success: results.iter().all(|r| r.status == BulkStatus::Success),
        total_files: results.len(),
        results,
    })
    .into_response()
}

/// Deletes an object by its id, the base64 encoded key.
#[utoipa::path(
    delete,
    path = "/objects/{id}",
    responses(
        (status = 200, description = "Object deleted", body = DeleteResponse),
        (status = 400, description = "Malformed id", body = ErrorResponse),
        (status = 404, description = "Object not found", body = ErrorResponse),
        (status = 500, description = "Backend error", body = ErrorResponse)
    ),
    tag = "objects",
    params(
        ("id" = String, Path, description = "Base64 encoded object key")
    ),
)]
pub async fn delete_object(State(storage): State<SharedStorage>, Path(id): Path<String>) -> Response {
    let Some(key) = kernel::decode_object_id(&id) else {
        return bad_request("Invalid object id");
    };
    match storage.delete(&key).await {
        Ok(()) => {
            tracing::info!("object {key} deleted");
            Json(DeleteResponse { success: true }).into_response()
        }
        Err(e) => storage_failure("Delete failed", &e),
    }
}

/// Gets object content by its id.
#[utoipa::path(
    get,
    path = "/objects/{id}",
    responses(
        (status = 200, description = "Object content as attachment", content_type = "application/octet-stream"),
        (status = 400, description = "Malformed id", body = ErrorResponse),
        (status = 404, description = "Object not found", body = ErrorResponse)
    ),
    tag = "objects",
    params(
        ("id" = String, Path, description = "Base64 encoded object key")
    ),
)]
pub async fn get_object(State(storage): State<SharedStorage>, Path(id): Path<String>) -> Response {
    let Some(key) = kernel::decode_object_id(&id) else {
        return bad_request("Invalid object id");
    };
    match storage.read(&key).await {
        Ok((info, data)) => {
            tracing::info!("object {key} size {}", data.len());
            FileReply::new(data, info).into_response()
        }
        Err(e) => storage_failure("Download failed", &e),
    }
}

/// Lists every folder prefix found in object keys.
#[utoipa::path(
    get,
    path = "/folders/list",
    responses(
        (status = 200, description = "Sorted folder paths", body = [String]),
        (status = 500, description = "Backend error", body = ErrorResponse)
    ),
    tag = "objects",
)]
pub async fn list_folders(State(storage): State<SharedStorage>) -> Response {
    match storage.list("").await {
        Ok(objects) => Json(kernel::folders_of(objects.iter().map(|o| o.path.as_str()))).into_response(),
        Err(e) => storage_failure("Failed to list folders", &e),
    }
}

/// Lists objects whose key starts with `prefix`.
#[utoipa::path(
    get,
    path = "/files",
    responses(
        (status = 200, description = "Objects ordered by key", body = [ObjectInfo]),
        (status = 500, description = "Backend error", body = ErrorResponse)
    ),
    tag = "objects",
    params(
        ("prefix" = Option<String>, Query, description = "Key prefix, usually a folder followed by /")
    ),
)]
pub async fn list_files(State(storage): State<SharedStorage>, Query(query): Query<PrefixQuery>) -> Response {
    let prefix = query.prefix.unwrap_or_default();
    match storage.list(prefix.trim_start_matches('/')).await {
        Ok(objects) => Json::<Vec<ObjectInfo>>(objects).into_response(),
        Err(e) => storage_failure("Failed to list files", &e),
    }
}

/// Gets a link the browser can download an object from.
#[utoipa::path(
    get,
    path = "/download",
    responses(
        (status = 200, description = "Download link", body = DownloadLink),
        (status = 400, description = "Path missing", body = ErrorResponse),
        (status = 500, description = "Backend error", body = ErrorResponse)
    ),
    tag = "objects",
    params(
        ("path" = String, Query, description = "Object key")
    ),
)]
pub async fn download_link(State(storage): State<SharedStorage>, Query(query): Query<PathQuery>) -> Response {
    let Some(path) = query.path.as_deref().map(str::trim).filter(|p| !p.is_empty()) else {
        return bad_request("Path is required");
    };
    match storage.download_url(path).await {
        Ok(Some(url)) => Json(DownloadLink { url }).into_response(),
        Ok(None) => {
            let id = kernel::encode_object_id(path);
            Json(DownloadLink {
                url: format!("/objects/{}", urlencoding::encode(&id)),
            })
            .into_response()
        }
        Err(e) => storage_failure("Failed to generate download link", &e),
    }
}

/// Shows which backend and bucket the server is bound to.
#[utoipa::path(
    get,
    path = "/storage/config",
    responses(
        (status = 200, description = "Backend diagnostics", body = StorageConfig),
    ),
    tag = "objects",
)]
pub async fn storage_config(State(storage): State<SharedStorage>) -> Json<StorageConfig> {
    let info = storage.describe();
    let can_list_files = match storage.list("").await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!("bucket listing unavailable: {e}");
            false
        }
    };
    Json(StorageConfig {
        backend: info.kind.to_owned(),
        bucket: info.bucket,
        can_list_files,
    })
}

pub async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Collects `folderName` and every file part of a form, whatever the part order.
async fn read_form(mut multipart: Multipart) -> io::Result<(String, Vec<FormFile>)> {
    let mut folder = String::new();
    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(io::Error::other)? {
        let part = field.name().unwrap_or_default().to_owned();
        match part.as_str() {
            "folderName" => {
                folder = field.text().await.map_err(io::Error::other)?;
            }
            "file" | "files" => {
                let name = field.file_name().unwrap_or_default().to_owned();
                let content_type = field
                    .content_type()
                    .unwrap_or(DEFAULT_CONTENT_TYPE)
                    .to_owned();
                let (data, read_bytes) = read_from_stream(field).await?;
                tracing::info!("file: {name} read: {read_bytes}");
                files.push(FormFile {
                    name,
                    content_type,
                    data: Bytes::from(data),
                });
            }
            other => tracing::debug!("ignoring form field {other}"),
        }
    }
    Ok((folder, files))
}

async fn store(storage: &SharedStorage, folder: &str, file: FormFile) -> Result<ObjectInfo, StorageError> {
    let target = TargetPath::new(folder, &file.name);
    if target.is_empty() {
        return Err(StorageError::InvalidPath(file.name));
    }
    storage.upload(&target.key(), &file.content_type, file.data).await
}

fn storage_failure(error: &str, e: &StorageError) -> Response {
    tracing::error!("{error}: {e}");
    let body = ErrorResponse::new(error).with_details(e);
    match e {
        StorageError::NotFound(_) => failure(StatusCode::NOT_FOUND, body),
        StorageError::InvalidPath(_) => failure(StatusCode::BAD_REQUEST, body),
        _ => internal_error(body),
    }
}

fn bad_request(error: &str) -> Response {
    failure(StatusCode::BAD_REQUEST, ErrorResponse::new(error))
}

fn bad_request_with<E: ToString>(error: &str, e: &E) -> Response {
    failure(StatusCode::BAD_REQUEST, ErrorResponse::new(error).with_details(e.to_string()))
}

fn internal_error(body: ErrorResponse) -> Response {
    failure(StatusCode::INTERNAL_SERVER_ERROR, body)
}

fn failure(status: StatusCode, body: ErrorResponse) -> Response {
    (status, Json(body)).into_response()
}

async fn read_from_stream<S, E>(stream: S) -> io::Result<(Vec<u8>, usize)>
where
    S: Stream<Item = Result<Bytes, E>> + StreamExt,
    E: Sync + std::error::Error + Send + 'static,
{
    // Convert the stream into an `AsyncRead`.
    let body_with_io_error = stream.map_err(io::Error::other);
    let body_reader = StreamReader::new(body_with_io_error);
    futures::pin_mut!(body_reader);
    let mut buffer = Vec::new();

    let copied_bytes = tokio::io::copy(&mut body_reader, &mut buffer).await?;
    let copied_bytes = usize::try_from(copied_bytes).unwrap_or(usize::MAX);
    Ok((buffer, copied_bytes))
}
