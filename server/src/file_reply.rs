use axum::{
    body::Body,
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use kernel::{ObjectInfo, DEFAULT_CONTENT_TYPE};

/// Object content sent as a browser download.
pub struct FileReply {
    data: Bytes,
    info: ObjectInfo,
}

impl FileReply {
    #[must_use]
    pub fn new(data: Bytes, info: ObjectInfo) -> Self {
        Self { data, info }
    }

    fn content_type(&self) -> HeaderValue {
        HeaderValue::from_str(&self.info.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE))
    }

    fn disposition(&self) -> Option<HeaderValue> {
        let file_name = ObjectInfo::name_of(&self.info.path).replace('"', "");
        HeaderValue::from_str(&format!(r#"attachment; filename="{file_name}""#)).ok()
    }
}

impl IntoResponse for FileReply {
    fn into_response(self) -> Response {
        let content_type = self.content_type();
        let disposition = self.disposition();
        let len = self.data.len();

        let mut res = Body::from(self.data).into_response();
        let headers = res.headers_mut();
        headers.insert(header::CONTENT_TYPE, content_type);
        if let Some(val) = disposition {
            headers.insert(header::CONTENT_DISPOSITION, val);
        }
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));

        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn info(path: &str, content_type: &str) -> ObjectInfo {
        ObjectInfo {
            id: kernel::encode_object_id(path),
            name: ObjectInfo::name_of(path).to_owned(),
            path: path.to_owned(),
            size: 3,
            content_type: content_type.to_owned(),
            created_at: String::new(),
            updated_at: String::new(),
            bucket: "files".to_owned(),
            checksum: None,
        }
    }

    #[rstest]
    #[case("file.ext", r#"attachment; filename="file.ext""#)]
    #[case("dir/file.ext", r#"attachment; filename="file.ext""#)]
    #[case("dir1/dir2/file.ext", r#"attachment; filename="file.ext""#)]
    #[case("dir/fi\"le.ext", r#"attachment; filename="file.ext""#)]
    #[trace]
    fn attachment_names_last_segment(#[case] path: &str, #[case] expected: &str) {
        // Arrange
        let reply = FileReply::new(Bytes::from_static(b"abc"), info(path, "text/plain"));

        // Act
        let response = reply.into_response();

        // Assert
        let disposition = response.headers().get(header::CONTENT_DISPOSITION).unwrap();
        assert_eq!(disposition, expected);
        assert_eq!(response.headers().get(header::CONTENT_LENGTH).unwrap(), "3");
    }

    #[rstest]
    #[case("image/png", "image/png")]
    #[case("bad\nvalue", DEFAULT_CONTENT_TYPE)]
    #[trace]
    fn content_type_falls_back(#[case] stored: &str, #[case] expected: &str) {
        // Arrange
        let reply = FileReply::new(Bytes::new(), info("a.png", stored));

        // Act
        let response = reply.into_response();

        // Assert
        assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), expected);
    }
}
