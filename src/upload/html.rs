//! HTML page uploads.

use bytes::Bytes;
use serde_json::json;

use super::file::FileUpload;
use super::UploadPart;
use crate::error::Result;
use crate::protocol::ResourceRequest;

const HTML_MIME: &str = "text/html";
const HTML_CHARSET: &str = "utf-8";
const METADATA_PART: &str = "metadata";
const METADATA_MIME: &str = "application/json";

/// Upload of a rendered HTML page.
///
/// The page is sent as the `file` part (`text/html; charset=utf-8`). When a
/// base URL is set, a `metadata` part `{"baseUrl": ..}` tells the gateway how
/// to resolve relative links in the page.
#[derive(Debug, Clone)]
pub struct HtmlUpload {
    file: FileUpload,
    base_url: Option<String>,
}

impl HtmlUpload {
    /// Create an upload answering `request`.
    pub fn new(request: ResourceRequest) -> Self {
        Self {
            file: FileUpload::new(request).content_type(HTML_MIME, Some(HTML_CHARSET)),
            base_url: None,
        }
    }

    /// Set the page body
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.file = self.file.content(Bytes::from(body.into()));
        self
    }

    /// Set the base URL relative links resolve against
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Request this upload answers
    pub fn request(&self) -> &ResourceRequest {
        self.file.request()
    }

    /// Configured base URL
    pub fn get_base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub(crate) fn into_parts(self) -> Result<Vec<UploadPart>> {
        let mut parts = self.file.into_parts()?;

        if let Some(base_url) = self.base_url {
            let metadata = json!({ "baseUrl": base_url });
            parts.push(UploadPart {
                name: METADATA_PART.to_string(),
                filename: None,
                content_type: METADATA_MIME.to_string(),
                data: Bytes::from(metadata.to_string()),
            });
        }

        Ok(parts)
    }
}
