//! Transport layer abstraction for the CMS Gateway client.
//!
//! Provides pluggable backends for both channels:
//! - **Command channel**: [`CommandTransport`], implemented by
//!   [`WebSocketTransport`] (tokio-tungstenite).
//! - **Upload channel**: [`UploadTransport`], implemented by
//!   [`HttpUploadTransport`] (reqwest multipart).
//!
//! Scripted in-memory transports (`MemoryTransport`, `MemoryUploadTransport`)
//! are available to tests and with the `test-util` feature.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            CommandChannel                │
//! │        (Transport-Agnostic)             │
//! └──────────────────┬──────────────────────┘
//!                    │ connect(uri)
//!                    ▼
//!          ┌──────────────────┐
//!          │    Connection    │
//!          ├────────┬─────────┤
//!          │  link  │ events  │
//!          └────────┴─────────┘
//!     send_text / close    Text | Error | Closed
//! ```
//!
//! A connection delivers any number of `Text` events and then exactly one
//! `Closed` event, optionally preceded by an `Error` event. Events for one
//! connection arrive in order on a single receiver.

mod http;
#[cfg(any(test, feature = "test-util"))]
mod memory;
mod websocket;

pub use http::HttpUploadTransport;
#[cfg(any(test, feature = "test-util"))]
pub use memory::{
    MemoryServer, MemoryTransport, MemoryUploadTransport, PendingUpload, UploadServer,
};
pub use websocket::{WebSocketTransport, DEFAULT_HEARTBEAT_INTERVAL};

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use url::Url;

use crate::error::{GatewayError, Result};
use crate::protocol::{ABNORMAL_CLOSURE, NORMAL_CLOSURE};
use crate::upload::UploadRequest;

/// Why a connection was closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// WebSocket close code.
    pub code: u16,
    /// Close reason text.
    pub reason: String,
}

impl CloseReason {
    /// Create a close reason
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Intentional closure (code 1000)
    pub fn normal(reason: impl Into<String>) -> Self {
        Self::new(NORMAL_CLOSURE, reason)
    }

    /// Transport-level drop (code 1006)
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(ABNORMAL_CLOSURE, reason)
    }

    /// Whether either side closed the connection on purpose
    pub fn is_normal(&self) -> bool {
        self.code == NORMAL_CLOSURE
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} ({})", self.code, self.reason)
        }
    }
}

/// Inbound notification from a command channel connection.
#[derive(Debug)]
pub enum TransportEvent {
    /// Text message from the gateway
    Text(String),
    /// Transport-level error; a `Closed` event follows
    Error(GatewayError),
    /// Connection closed
    Closed(CloseReason),
}

/// Outbound half of a live command channel connection.
pub trait SessionLink: Send + Sync {
    /// Send a text message.
    fn send_text(&self, text: String) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Close the connection with the given reason.
    fn close(&self, reason: CloseReason) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// A live command channel connection.
pub struct Connection {
    /// Send/close half.
    pub link: Arc<dyn SessionLink>,
    /// Ordered inbound events.
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Transport trait for the command channel.
///
/// Implementations map connectivity problems to transient errors
/// ([`GatewayError::Io`], [`GatewayError::Connection`]) and rejections that
/// retrying cannot fix to anything else.
pub trait CommandTransport: Send + Sync {
    /// Open a connection to `uri`.
    fn connect(&self, uri: Url) -> Pin<Box<dyn Future<Output = Result<Connection>> + Send + '_>>;

    /// Get the transport name for logging.
    fn name(&self) -> &'static str;
}

/// Buffered HTTP response from the upload channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Bytes,
}

impl RawResponse {
    /// Create a response
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Transport trait for the upload channel (HTTP POST semantics).
pub trait UploadTransport: Send + Sync {
    /// Execute an upload request.
    ///
    /// The returned future owns everything it needs so it can be driven on
    /// its own task.
    fn execute(
        &self,
        request: UploadRequest,
    ) -> Pin<Box<dyn Future<Output = Result<RawResponse>> + Send + 'static>>;

    /// Get the transport name for logging.
    fn name(&self) -> &'static str;
}

/// `scheme://host[:port]/path` of an endpoint, without the credentials in its query.
pub(crate) fn display_endpoint(uri: &Url) -> String {
    let mut shown = format!("{}://{}", uri.scheme(), uri.host_str().unwrap_or_default());
    if let Some(port) = uri.port() {
        shown.push_str(&format!(":{port}"));
    }
    shown.push_str(uri.path());
    shown
}
