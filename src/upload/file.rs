//! Arbitrary file uploads.

use bytes::Bytes;

use super::{UploadPart, DEFAULT_CONTENT_TYPE};
use crate::error::{GatewayError, Result};
use crate::protocol::ResourceRequest;

/// Form field carrying the uploaded content
pub(crate) const FILE_PART: &str = "file";

/// Upload of binary content for a resource request.
#[derive(Debug, Clone)]
pub struct FileUpload {
    request: ResourceRequest,
    filename: Option<String>,
    content_type: String,
    content: Option<Bytes>,
}

impl FileUpload {
    /// Create an upload answering `request`.
    pub fn new(request: ResourceRequest) -> Self {
        Self {
            request,
            filename: None,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            content: None,
        }
    }

    /// Set the file name reported to the gateway
    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Set the content type, optionally with a charset.
    ///
    /// ```rust,ignore
    /// let upload = FileUpload::new(request).content_type("text/css", Some("utf-8"));
    /// assert_eq!(upload.mime(), "text/css; charset=utf-8");
    /// ```
    pub fn content_type(mut self, mime: &str, charset: Option<&str>) -> Self {
        self.content_type = match charset {
            Some(charset) => format!("{mime}; charset={charset}"),
            None => mime.to_string(),
        };
        self
    }

    /// Set the content
    pub fn content(mut self, content: impl Into<Bytes>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Request this upload answers
    pub fn request(&self) -> &ResourceRequest {
        &self.request
    }

    /// Content type sent with the file part
    pub fn mime(&self) -> &str {
        &self.content_type
    }

    pub(crate) fn into_parts(self) -> Result<Vec<UploadPart>> {
        let data = self.content.ok_or_else(|| {
            GatewayError::Config(format!("upload for rid={} has no content", self.request.id))
        })?;

        Ok(vec![UploadPart {
            name: FILE_PART.to_string(),
            filename: self.filename,
            content_type: self.content_type,
            data,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ResourceRequest {
        ResourceRequest::new("42", "/styles/site.css")
    }

    #[test]
    fn test_defaults_to_octet_stream() {
        let upload = FileUpload::new(request());
        assert_eq!(upload.mime(), "application/octet-stream");
    }

    #[test]
    fn test_content_type_with_charset() {
        let upload = FileUpload::new(request()).content_type("text/css", Some("utf-8"));
        assert_eq!(upload.mime(), "text/css; charset=utf-8");

        let upload = upload.content_type("image/png", None);
        assert_eq!(upload.mime(), "image/png");
    }

    #[test]
    fn test_file_part_layout() {
        let parts = FileUpload::new(request())
            .filename("site.css")
            .content_type("text/css", None)
            .content("body {}")
            .into_parts()
            .unwrap();

        assert_eq!(
            parts,
            vec![UploadPart {
                name: "file".into(),
                filename: Some("site.css".into()),
                content_type: "text/css".into(),
                data: Bytes::from_static(b"body {}"),
            }]
        );
    }

    #[test]
    fn test_missing_content_is_rejected() {
        let err = FileUpload::new(request()).into_parts().unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
        assert!(err.to_string().contains("rid=42"));
    }
}
