use async_trait::async_trait;
use bytes::Bytes;
use kernel::{ContentRange, ObjectInfo, SessionHandle, DEFAULT_CONTENT_TYPE, encode_object_id};
use reqwest::header::{CONTENT_RANGE, CONTENT_TYPE, LOCATION};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use url::Url;

use crate::domain::{BackendInfo, RangeAck, Storage};
use crate::error::{StorageError, StorageResult};

/// Google Cloud Storage JSON API endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

const UPLOAD_CONTENT_TYPE: &str = "X-Upload-Content-Type";
/// "Resume Incomplete" reply of the resumable upload protocol.
const RESUME_INCOMPLETE: u16 = 308;

/// Bucket behind a GCS compatible JSON API.
///
/// Chunks are forwarded to the backend's resumable upload session with the
/// `Content-Range` header, `200`/`201` meaning done and `308` meaning
/// "send the next range".
pub struct GcsBucket {
    client: Client,
    endpoint: Url,
    bucket: Option<String>,
    token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcsObject {
    name: String,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    time_created: Option<String>,
    #[serde(default)]
    updated: Option<String>,
    #[serde(default)]
    md5_hash: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcsListing {
    #[serde(default)]
    items: Vec<GcsObject>,
    #[serde(default)]
    next_page_token: Option<String>,
}

impl GcsObject {
    fn into_info(self, bucket: &str) -> ObjectInfo {
        let updated = self.updated.unwrap_or_default();
        ObjectInfo {
            id: encode_object_id(&self.name),
            name: ObjectInfo::name_of(&self.name).to_owned(),
            size: self.size.and_then(|s| s.parse().ok()).unwrap_or_default(),
            content_type: self
                .content_type
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_owned()),
            created_at: self.time_created.unwrap_or_else(|| updated.clone()),
            updated_at: updated,
            bucket: bucket.to_owned(),
            checksum: self.md5_hash,
            path: self.name,
        }
    }
}

impl GcsBucket {
    pub fn new(endpoint: &str, bucket: Option<&str>, token: Option<&str>) -> StorageResult<Self> {
        // 308 is the protocol's "keep going", never a redirect to follow
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            endpoint: Url::parse(endpoint)?,
            bucket: bucket
                .map(str::trim)
                .filter(|b| !b.is_empty())
                .map(str::to_owned),
            token: token.map(str::to_owned),
        })
    }

    fn bucket(&self) -> StorageResult<&str> {
        self.bucket.as_deref().ok_or(StorageError::NoBucket)
    }

    fn url(&self, segments: &[&str]) -> StorageResult<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|()| StorageError::Session(format!("{} cannot be a base URL", self.endpoint)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn object_url(&self, path: &str) -> StorageResult<Url> {
        let bucket = self.bucket()?;
        self.url(&["storage", "v1", "b", bucket, "o", path])
    }

    fn upload_url(&self, upload_type: &str, path: &str) -> StorageResult<Url> {
        let bucket = self.bucket()?;
        let mut url = self.url(&["upload", "storage", "v1", "b", bucket, "o"])?;
        url.query_pairs_mut()
            .append_pair("uploadType", upload_type)
            .append_pair("name", path);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn fetch_object(&self, path: &str) -> StorageResult<GcsObject> {
        let response = self
            .authorize(self.client.get(self.object_url(path)?))
            .send()
            .await?;
        let response = expect_success(response, path).await?;
        Ok(response.json().await?)
    }
}

async fn expect_success(response: Response, path: &str) -> StorageResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(StorageError::NotFound(path.to_owned()));
    }
    let body = response.text().await.unwrap_or_default();
    Err(StorageError::Backend {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl Storage for GcsBucket {
    fn describe(&self) -> BackendInfo {
        BackendInfo {
            kind: "gcs",
            bucket: self.bucket.clone(),
        }
    }

    async fn create_session(&self, path: &str, content_type: &str) -> StorageResult<SessionHandle> {
        tracing::info!(
            "creating resumable upload session for {path} in bucket {}",
            self.bucket()?
        );
        let request = self
            .client
            .post(self.upload_url("resumable", path)?)
            .header(UPLOAD_CONTENT_TYPE, content_type)
            .json(&serde_json::json!({ "contentType": content_type }));
        let response = self.authorize(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Session(format!(
                "backend refused session for {path}: {status} {body}"
            )));
        }
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| StorageError::Session("backend returned no session URL".to_owned()))?;

        Ok(SessionHandle::new(location))
    }

    async fn write_range(
        &self,
        session: &SessionHandle,
        range: ContentRange,
        data: Bytes,
    ) -> StorageResult<RangeAck> {
        let session_url = Url::parse(session.as_str())
            .map_err(|e| StorageError::Session(format!("malformed session URL: {e}")))?;
        if session_url.origin() != self.endpoint.origin() {
            return Err(StorageError::Session(format!(
                "session URL {session_url} is not served by {}",
                self.endpoint
            )));
        }
        let response = self
            .client
            .put(session_url)
            .header(CONTENT_RANGE, range.to_string())
            .body(data)
            .send()
            .await?;

        let ack = match response.status().as_u16() {
            200 | 201 => RangeAck::Complete,
            RESUME_INCOMPLETE => RangeAck::Partial,
            status => RangeAck::Rejected(format!("Unexpected response status: {status}")),
        };
        tracing::debug!("{range}: {ack:?}");
        Ok(ack)
    }

    async fn upload(&self, path: &str, content_type: &str, data: Bytes) -> StorageResult<ObjectInfo> {
        let bucket = self.bucket()?.to_owned();
        let request = self
            .client
            .post(self.upload_url("media", path)?)
            .header(CONTENT_TYPE, content_type)
            .body(data);
        let response = self.authorize(request).send().await?;
        let response = expect_success(response, path).await?;
        let object: GcsObject = response.json().await?;
        Ok(object.into_info(&bucket))
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        let response = self
            .authorize(self.client.delete(self.object_url(path)?))
            .send()
            .await?;
        expect_success(response, path).await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>> {
        let bucket = self.bucket()?.to_owned();
        let mut objects = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = self.url(&["storage", "v1", "b", bucket.as_str(), "o"])?;
            {
                let mut query = url.query_pairs_mut();
                if !prefix.is_empty() {
                    query.append_pair("prefix", prefix);
                }
                if let Some(token) = &page_token {
                    query.append_pair("pageToken", token);
                }
            }
            let response = self.authorize(self.client.get(url)).send().await?;
            let response = expect_success(response, prefix).await?;
            let listing: GcsListing = response.json().await?;
            objects.extend(listing.items.into_iter().map(|o| o.into_info(&bucket)));

            match listing.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        objects.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(objects)
    }

    async fn read(&self, path: &str) -> StorageResult<(ObjectInfo, Bytes)> {
        let bucket = self.bucket()?.to_owned();
        let info = self.fetch_object(path).await?.into_info(&bucket);

        let mut url = self.object_url(path)?;
        url.query_pairs_mut().append_pair("alt", "media");
        let response = self.authorize(self.client.get(url)).send().await?;
        let response = expect_success(response, path).await?;
        Ok((info, response.bytes().await?))
    }

    async fn download_url(&self, path: &str) -> StorageResult<Option<String>> {
        // objects are served through this service unless the bucket is public
        if self.token.is_some() {
            return Ok(None);
        }
        let mut url = self.object_url(path)?;
        url.query_pairs_mut().append_pair("alt", "media");
        Ok(Some(url.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("http://localhost:4443", "docs/a b.txt", "http://localhost:4443/storage/v1/b/files/o/docs%2Fa%20b.txt")]
    #[case("http://localhost:4443/", "a.txt", "http://localhost:4443/storage/v1/b/files/o/a.txt")]
    #[case("http://localhost/gcs/", "a.txt", "http://localhost/gcs/storage/v1/b/files/o/a.txt")]
    #[trace]
    fn object_url_encodes_key_as_one_segment(#[case] endpoint: &str, #[case] key: &str, #[case] expected: &str) {
        // Arrange
        let bucket = GcsBucket::new(endpoint, Some("files"), None).unwrap();

        // Act
        let url = bucket.object_url(key).unwrap();

        // Assert
        assert_eq!(url.as_str(), expected);
    }

    #[test]
    fn resumable_upload_url() {
        // Arrange
        let bucket = GcsBucket::new("http://localhost:4443", Some("files"), None).unwrap();

        // Act
        let url = bucket.upload_url("resumable", "docs/a.txt").unwrap();

        // Assert
        assert_eq!(
            url.as_str(),
            "http://localhost:4443/upload/storage/v1/b/files/o?uploadType=resumable&name=docs%2Fa.txt"
        );
    }

    #[rstest]
    #[case("http://169.254.169.254/latest/meta-data")]
    #[case("http://localhost:9999/upload/storage/v1/b/files/o?upload_id=1")]
    #[case("https://localhost:4443/upload/storage/v1/b/files/o?upload_id=1")]
    #[trace]
    #[tokio::test]
    async fn foreign_session_url_is_refused(#[case] session: &str) {
        // Arrange
        let bucket = GcsBucket::new("http://localhost:4443", Some("files"), None).unwrap();
        let range = ContentRange::new(0, 2, 2).unwrap();

        // Act
        let ack = bucket
            .write_range(&SessionHandle::new(session), range, Bytes::from_static(b"ab"))
            .await;

        // Assert
        assert!(matches!(ack, Err(StorageError::Session(_))));
    }

    #[test]
    fn missing_bucket_is_reported() {
        // Arrange
        let bucket = GcsBucket::new(DEFAULT_ENDPOINT, Some("  "), None).unwrap();

        // Act
        let url = bucket.object_url("a.txt");

        // Assert
        assert!(matches!(url, Err(StorageError::NoBucket)));
    }

    #[test]
    fn object_without_metadata_gets_defaults() {
        // Arrange
        let object = GcsObject {
            name: "docs/a.txt".to_owned(),
            size: Some("12".to_owned()),
            content_type: None,
            time_created: None,
            updated: Some("2024-01-01T00:00:00Z".to_owned()),
            md5_hash: None,
        };

        // Act
        let info = object.into_info("files");

        // Assert
        assert_eq!(info.name, "a.txt");
        assert_eq!(info.size, 12);
        assert_eq!(info.content_type, DEFAULT_CONTENT_TYPE);
        assert_eq!(info.created_at, "2024-01-01T00:00:00Z");
        assert_eq!(info.id, encode_object_id("docs/a.txt"));
    }
}
