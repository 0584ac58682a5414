//! CMS Gateway client error types.
//!
//! # Error Classification
//!
//! Errors are local to the channel or call that produced them:
//!
//! - **Command channel**: delivered to the registered
//!   [`CommandHandler`](crate::channel::CommandHandler) through `on_error`.
//! - **Upload channel**: delivered through the future of the upload that failed.
//!
//! The reconnect policy only distinguishes *transient* errors (I/O and
//! connectivity failures, see [`GatewayError::is_transient`]) from everything
//! else, which it treats as permanent.

use std::sync::Arc;

use thiserror::Error;

/// CMS Gateway client errors.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Inbound command message could not be decoded.
    #[error("Protocol decode error: {0}")]
    Decode(String),

    /// Transient transport failure (socket dropped, connection refused, ...).
    #[error("Connection error: {0}")]
    Connection(String),

    /// Transport rejected the connection in a way retrying will not fix.
    #[error("Handshake error: {0}")]
    Handshake(String),

    /// The connect loop gave up.
    #[error("Failed to connect after {attempts} attempt(s): {source}")]
    ConnectFailed {
        /// Number of connection attempts made in this cycle.
        attempts: u32,
        /// Last error observed by the reconnect policy.
        #[source]
        source: Arc<GatewayError>,
    },

    /// Gateway rejected the credentials.
    #[error("Authentication failed")]
    Authentication,

    /// Gateway asked the client to disconnect.
    #[error("Disconnected by gateway: {0}")]
    Disconnected(String),

    /// Upload answered with a non-success HTTP status.
    #[error("Upload failed ({status}): {code} {messages}")]
    Upload {
        /// HTTP status code.
        status: u16,
        /// Application status code from the acknowledgement body.
        code: String,
        /// Acknowledgement messages joined by a space.
        messages: String,
    },

    /// Upload acknowledgement body was malformed.
    #[error("Invalid upload acknowledgement: {0}")]
    InvalidAcknowledgement(String),

    /// Upload was cancelled by the caller.
    #[error("Upload cancelled")]
    Cancelled,

    /// Command channel has been closed.
    #[error("Command channel is closed")]
    Closed,

    /// No live command channel connection.
    #[error("Command channel is not connected")]
    NotConnected,

    /// `connect` was called on a channel that already has a live session.
    #[error("Command channel is already connected")]
    AlreadyConnected,

    /// HTTP communication error.
    #[error("Network error: {0}")]
    Network(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// Malformed endpoint URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for CMS Gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    /// Whether the reconnect policy may keep retrying after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Connection(_) | GatewayError::Io(_))
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Network(err.to_string())
    }
}

impl From<toml::de::Error> for GatewayError {
    fn from(err: toml::de::Error) -> Self {
        GatewayError::Config(err.to_string())
    }
}

impl From<url::ParseError> for GatewayError {
    fn from(err: url::ParseError) -> Self {
        GatewayError::InvalidUrl(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for GatewayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;

        match err {
            WsError::Io(e) => GatewayError::Io(e),
            WsError::ConnectionClosed | WsError::AlreadyClosed | WsError::Protocol(_) => {
                GatewayError::Connection(err.to_string())
            },
            WsError::Http(response) => GatewayError::Handshake(format!(
                "server answered the upgrade with HTTP {}",
                response.status()
            )),
            other => GatewayError::Handshake(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(GatewayError::Connection("reset".into()).is_transient());
        assert!(GatewayError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionRefused))
            .is_transient());

        assert!(!GatewayError::Handshake("401".into()).is_transient());
        assert!(!GatewayError::Authentication.is_transient());
        assert!(!GatewayError::Decode("bad".into()).is_transient());
    }

    #[test]
    fn test_upload_error_message() {
        let err = GatewayError::Upload {
            status: 500,
            code: "GENERAL_ERROR".into(),
            messages: "disk full retry later".into(),
        };
        assert_eq!(
            err.to_string(),
            "Upload failed (500): GENERAL_ERROR disk full retry later"
        );
    }

    #[test]
    fn test_websocket_error_mapping() {
        use tokio_tungstenite::tungstenite::error::UrlError;
        use tokio_tungstenite::tungstenite::Error as WsError;

        assert!(GatewayError::from(WsError::ConnectionClosed).is_transient());
        assert!(!GatewayError::from(WsError::Url(UrlError::NoHostName)).is_transient());
    }
}
