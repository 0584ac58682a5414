//! # CMS Gateway Client
//!
//! Client-side endpoint for a remote CMS gateway. The gateway asks for
//! content over a durable **command channel** (WebSocket) and the client
//! delivers it over a one-shot **upload channel** (HTTP POST).
//!
//! ## Features
//!
//! - **Reconnecting command channel**: abnormal drops are retried with
//!   exponential backoff; normal closures are final
//! - **Typed commands**: case-insensitive decoding of gateway commands into [`Command`]
//! - **Concurrent uploads**: every upload runs on its own task and can be
//!   cancelled on its own
//! - **Pluggable transports**: tokio-tungstenite and reqwest by default,
//!   in-memory transports for tests behind the `test-util` feature
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────────────────────┐
//!   Application   │        GatewayClient         │
//!   (handler) <───┤  CommandChannel   upload()   │
//!                 └──────┬───────────────┬───────┘
//!                        │ WebSocket     │ HTTP POST (multipart)
//!                        v               v
//!                 ┌──────────────────────────────┐
//!                 │         CMS Gateway          │
//!                 └──────────────────────────────┘
//! ```
//!
//! ### Reconnect Backoff
//!
//! | Attempt | Delay before it |
//! |---------|-----------------|
//! | 1       | 0 s             |
//! | 2       | 1 s             |
//! | 3       | 3 s             |
//! | 4       | 7 s             |
//! | n       | `(prev + 0.5 s) * 2` |
//!
//! Only transient errors (I/O, dropped connections) keep the loop going.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cms_gateway::{ChannelEvent, Command, ErrorResponse, GatewayClient, HtmlUpload};
//!
//! let client = GatewayClient::builder()
//!     .api_key("key")
//!     .project_id("project")
//!     .build()?;
//!
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! client.connect(tx).await?;
//!
//! while let Some(event) = rx.recv().await {
//!     match event {
//!         ChannelEvent::Command(Command::GetHtml(request)) => {
//!             let page = HtmlUpload::new(request).body(render()?);
//!             client.upload(page)?.await?;
//!         },
//!         ChannelEvent::Command(command) => {
//!             if let Some(request) = command.request() {
//!                 let error = ErrorResponse::new(request).with_http_code(404);
//!                 client.send_error(&error).await?;
//!             }
//!         },
//!         ChannelEvent::Disconnected => break,
//!         _ => {},
//!     }
//! }
//! ```

pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod upload;

// Re-exports for convenience
pub use channel::{ChannelEvent, ChannelState, CommandChannel, CommandHandler};
pub use client::{GatewayClient, GatewayClientBuilder};
pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use protocol::{Command, ErrorResponse, ReconnectPolicy, ResourceRequest};
pub use transport::{
    CommandTransport, HttpUploadTransport, UploadTransport, WebSocketTransport,
};
pub use upload::{FileUpload, HtmlUpload, Upload, UploadHandle, UploadOutcome};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
