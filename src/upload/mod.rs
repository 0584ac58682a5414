//! Upload channel: request bodies and acknowledgement translation.
//!
//! Results for a [`ResourceRequest`](crate::protocol::ResourceRequest) are
//! delivered as one `multipart/form-data` POST per request:
//!
//! | Part       | Content type                  | Present                      |
//! |------------|-------------------------------|------------------------------|
//! | `file`     | upload content type           | always                       |
//! | `metadata` | `application/json`            | HTML uploads with a base URL |
//!
//! The gateway answers with `{"response":{"code":..,"messages":[..]}}`, which
//! [`status`] turns into an [`UploadOutcome`] or a [`GatewayError::Upload`](crate::GatewayError::Upload).

mod file;
mod html;
pub mod status;

pub use file::FileUpload;
pub use html::HtmlUpload;
pub use status::{translate, UploadHandle, UploadOutcome, UploadStatusFuture};

use bytes::Bytes;
use url::Url;

use crate::error::Result;
use crate::protocol::ResourceRequest;

/// Default content type of file uploads
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// One part of a multipart upload body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPart {
    /// Form field name.
    pub name: String,
    /// File name sent in `Content-Disposition`, if any.
    pub filename: Option<String>,
    /// Content type of the part.
    pub content_type: String,
    /// Part content.
    pub data: Bytes,
}

/// Fully built upload, as handed to an [`UploadTransport`](crate::transport::UploadTransport).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    /// Target URI, including credentials and `rid`.
    pub uri: Url,
    /// Multipart body.
    pub parts: Vec<UploadPart>,
}

impl UploadRequest {
    /// Find a part by field name
    pub fn part(&self, name: &str) -> Option<&UploadPart> {
        self.parts.iter().find(|part| part.name == name)
    }
}

/// Any upload the client can send.
#[derive(Debug, Clone)]
pub enum Upload {
    /// Arbitrary file content.
    File(FileUpload),
    /// Rendered HTML page.
    Html(HtmlUpload),
}

impl Upload {
    /// Request this upload answers
    pub fn request(&self) -> &ResourceRequest {
        match self {
            Self::File(upload) => upload.request(),
            Self::Html(upload) => upload.request(),
        }
    }

    /// Build the transport request targeting `uri`.
    pub fn into_request(self, uri: Url) -> Result<UploadRequest> {
        let parts = match self {
            Self::File(upload) => upload.into_parts()?,
            Self::Html(upload) => upload.into_parts()?,
        };
        Ok(UploadRequest { uri, parts })
    }
}

impl From<FileUpload> for Upload {
    fn from(upload: FileUpload) -> Self {
        Self::File(upload)
    }
}

impl From<HtmlUpload> for Upload {
    fn from(upload: HtmlUpload) -> Self {
        Self::Html(upload)
    }
}
