//! Gateway client facade.
//!
//! [`GatewayClient`] ties the two channels together: the reconnecting
//! command channel that receives requests and the upload channel that
//! delivers the results.
//!
//! ```rust,ignore
//! use cms_gateway::{GatewayClient, HtmlUpload, ChannelEvent, Command};
//!
//! let client = GatewayClient::builder()
//!     .api_key("key")
//!     .project_id("project")
//!     .command_channel_endpoint("wss://gateway.example.com/cmd/websocket")
//!     .upload_channel_endpoint("https://gateway.example.com/upload")
//!     .build()?;
//!
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! client.connect(tx).await?;
//!
//! while let Some(event) = rx.recv().await {
//!     if let ChannelEvent::Command(Command::GetHtml(request)) = event {
//!         let page = HtmlUpload::new(request).body("<html>...</html>");
//!         let outcome = client.upload(page)?.await?;
//!     }
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};
use url::Url;

use crate::channel::{ChannelState, CommandChannel, CommandHandler};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::protocol::{ErrorResponse, ReconnectPolicy};
use crate::transport::{
    display_endpoint, CommandTransport, HttpUploadTransport, UploadTransport, WebSocketTransport,
    DEFAULT_HEARTBEAT_INTERVAL,
};
use crate::upload::{Upload, UploadHandle, UploadStatusFuture};

/// Default command channel endpoint
pub const DEFAULT_COMMAND_CHANNEL_ENDPOINT: &str = "ws://localhost/cmd/websocket";

/// Default upload channel endpoint
pub const DEFAULT_UPLOAD_CHANNEL_ENDPOINT: &str = "http://localhost/upload";

/// Default upload request timeout
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Client for the CMS Gateway.
pub struct GatewayClient {
    channel: CommandChannel,
    upload_uri: Url,
    upload_transport: Arc<dyn UploadTransport>,
}

impl GatewayClient {
    /// Start building a client
    pub fn builder() -> GatewayClientBuilder {
        GatewayClientBuilder::default()
    }

    /// Build a client from configuration.
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let mut builder = Self::builder()
            .command_channel_endpoint(&config.command_channel.endpoint)
            .upload_channel_endpoint(&config.upload_channel.endpoint)
            .heartbeat_interval(config.command_channel.heartbeat_interval())
            .upload_timeout(config.upload_channel.timeout())
            .reconnect_policy(config.reconnect.policy());

        if let Some(api_key) = &config.credentials.api_key {
            builder = builder.api_key(api_key);
        }
        if let Some(project_id) = &config.credentials.project_id {
            builder = builder.project_id(project_id);
        }

        builder.build()
    }

    /// Connect the command channel and deliver its events to `handler`.
    pub async fn connect<H: CommandHandler>(&self, handler: H) -> Result<()> {
        self.channel.connect(handler).await
    }

    /// Report a failed request to the gateway.
    pub async fn send_error(&self, error: &ErrorResponse) -> Result<()> {
        debug!(rid = %error.request().id, http_code = error.http_code(), "Sending error response");
        self.channel.send(error.to_json()).await
    }

    /// Send raw text over the command channel
    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.channel.send(text).await
    }

    /// Start an upload.
    ///
    /// The upload runs on its own task; await the handle for its outcome or
    /// cancel it. Must be called within a tokio runtime.
    pub fn upload(&self, upload: impl Into<Upload>) -> Result<UploadHandle> {
        let upload = upload.into();
        let rid = upload.request().id.clone();
        let request = upload.into_request(self.upload_uri(&rid))?;

        info!(
            rid = %rid,
            endpoint = %display_endpoint(&request.uri),
            transport = self.upload_transport.name(),
            parts = request.parts.len(),
            "Uploading"
        );

        let raw = self.upload_transport.execute(request);
        Ok(UploadHandle::spawn(rid, UploadStatusFuture::new(raw)))
    }

    /// Upload endpoint for request `rid`, including credentials
    pub fn upload_uri(&self, rid: &str) -> Url {
        let mut uri = self.upload_uri.clone();
        uri.query_pairs_mut().append_pair("rid", rid);
        uri
    }

    /// Command channel endpoint, including credentials
    pub fn command_channel_uri(&self) -> &Url {
        self.channel.uri()
    }

    /// Close the command channel. Running uploads are not affected.
    pub async fn close(&self) {
        self.channel.close().await;
    }

    /// Command channel state
    pub fn state(&self) -> ChannelState {
        self.channel.state()
    }
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("channel", &self.channel)
            .field("upload_endpoint", &display_endpoint(&self.upload_uri))
            .finish_non_exhaustive()
    }
}

/// Builder for [`GatewayClient`].
pub struct GatewayClientBuilder {
    api_key: Option<String>,
    project_id: Option<String>,
    command_channel_endpoint: String,
    upload_channel_endpoint: String,
    command_transport: Option<Arc<dyn CommandTransport>>,
    upload_transport: Option<Arc<dyn UploadTransport>>,
    reconnect_policy: ReconnectPolicy,
    heartbeat_interval: Duration,
    upload_timeout: Duration,
}

impl Default for GatewayClientBuilder {
    fn default() -> Self {
        Self {
            api_key: None,
            project_id: None,
            command_channel_endpoint: DEFAULT_COMMAND_CHANNEL_ENDPOINT.to_string(),
            upload_channel_endpoint: DEFAULT_UPLOAD_CHANNEL_ENDPOINT.to_string(),
            command_transport: None,
            upload_transport: None,
            reconnect_policy: ReconnectPolicy::new(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
        }
    }
}

impl GatewayClientBuilder {
    /// Set the API key
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the project ID
    pub fn project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Set the command channel endpoint
    pub fn command_channel_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.command_channel_endpoint = endpoint.into();
        self
    }

    /// Set the upload channel endpoint
    pub fn upload_channel_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.upload_channel_endpoint = endpoint.into();
        self
    }

    /// Use a custom command channel transport.
    ///
    /// The heartbeat interval only applies to the default WebSocket transport.
    pub fn command_transport(mut self, transport: Arc<dyn CommandTransport>) -> Self {
        self.command_transport = Some(transport);
        self
    }

    /// Use a custom upload transport.
    ///
    /// The upload timeout only applies to the default HTTP transport.
    pub fn upload_transport(mut self, transport: Arc<dyn UploadTransport>) -> Self {
        self.upload_transport = Some(transport);
        self
    }

    /// Set the reconnect policy
    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect_policy = policy;
        self
    }

    /// Set the heartbeat interval. Zero disables the heartbeat.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the upload request timeout
    pub fn upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = timeout;
        self
    }

    /// Build the client.
    ///
    /// Fails with [`GatewayError::Config`] when credentials are missing and
    /// with [`GatewayError::InvalidUrl`] when an endpoint does not parse.
    pub fn build(self) -> Result<GatewayClient> {
        let api_key = self
            .api_key
            .ok_or_else(|| GatewayError::Config("API key is required".to_string()))?;
        let project_id = self
            .project_id
            .ok_or_else(|| GatewayError::Config("project ID is required".to_string()))?;

        let command_uri = endpoint_uri(&self.command_channel_endpoint, &api_key, &project_id)?;
        let upload_uri = endpoint_uri(&self.upload_channel_endpoint, &api_key, &project_id)?;

        let command_transport = match self.command_transport {
            Some(transport) => transport,
            None => Arc::new(
                WebSocketTransport::new().with_heartbeat_interval(self.heartbeat_interval),
            ),
        };
        let upload_transport = match self.upload_transport {
            Some(transport) => transport,
            None => Arc::new(HttpUploadTransport::new(self.upload_timeout)?),
        };

        Ok(GatewayClient {
            channel: CommandChannel::new(command_uri, command_transport, self.reconnect_policy),
            upload_uri,
            upload_transport,
        })
    }
}

/// `endpoint` with the `key` and `projectId` query parameters appended.
fn endpoint_uri(endpoint: &str, api_key: &str, project_id: &str) -> Result<Url> {
    let mut uri = Url::parse(endpoint)
        .map_err(|e| GatewayError::InvalidUrl(format!("{endpoint}: {e}")))?;
    uri.query_pairs_mut()
        .append_pair("key", api_key)
        .append_pair("projectId", project_id);
    Ok(uri)
}
