//! HTTP upload transport.
//!
//! Posts uploads as `multipart/form-data` with reqwest and buffers the
//! acknowledgement body.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use tracing::debug;

use super::{display_endpoint, RawResponse, UploadTransport};
use crate::error::{GatewayError, Result};
use crate::upload::UploadRequest;

/// reqwest-backed upload transport.
#[derive(Debug, Clone)]
pub struct HttpUploadTransport {
    client: Client,
}

impl HttpUploadTransport {
    /// Create a transport whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Use an existing client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl UploadTransport for HttpUploadTransport {
    fn execute(
        &self,
        request: UploadRequest,
    ) -> Pin<Box<dyn Future<Output = Result<RawResponse>> + Send + 'static>> {
        let client = self.client.clone();

        Box::pin(async move {
            let endpoint = display_endpoint(&request.uri);
            let mut form = Form::new();
            for part in request.parts {
                let mut body = Part::bytes(part.data.to_vec()).mime_str(&part.content_type)?;
                if let Some(filename) = part.filename {
                    body = body.file_name(filename);
                }
                form = form.part(part.name, body);
            }

            let response = client.post(request.uri).multipart(form).send().await?;
            let status = response.status().as_u16();
            let body = response.bytes().await?;

            debug!(endpoint = %endpoint, status = status, len = body.len(), "Upload answered");
            Ok(RawResponse { status, body })
        })
    }

    fn name(&self) -> &'static str {
        "HTTP"
    }
}
