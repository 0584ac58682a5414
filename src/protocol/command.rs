//! Commands received over the command channel.

use std::fmt;

/// A request from the gateway to fetch content for a URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRequest {
    /// Request ID (`rid`), echoed back on uploads and error notifications.
    pub id: String,
    /// URI of the requested content.
    pub uri: String,
}

impl ResourceRequest {
    /// Create a request
    pub fn new(id: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uri: uri.into(),
        }
    }
}

/// Command sent by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    /// Credentials were accepted; the channel is usable.
    AuthenticationSuccess,
    /// Credentials were rejected.
    AuthenticationError,
    /// Gateway is terminating the session.
    Disconnect {
        /// Human-readable reason, if the gateway sent one.
        reason: Option<String>,
    },
    /// Fetch an HTML page.
    GetHtml(ResourceRequest),
    /// Fetch a linked resource (stylesheet, image, ...).
    GetResource(ResourceRequest),
}

impl Command {
    /// Wire name of the command (`cmd` field)
    pub fn name(&self) -> &'static str {
        match self {
            Self::AuthenticationSuccess => "authenticationSuccess",
            Self::AuthenticationError => "authenticationError",
            Self::Disconnect { .. } => "disconnect",
            Self::GetHtml(_) => "getHtml",
            Self::GetResource(_) => "getResource",
        }
    }

    /// The resource request carried by `GetHtml` / `GetResource`.
    pub fn request(&self) -> Option<&ResourceRequest> {
        match self {
            Self::GetHtml(request) | Self::GetResource(request) => Some(request),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.request() {
            Some(request) => write!(f, "{}(rid={}, uri={})", self.name(), request.id, request.uri),
            None => f.write_str(self.name()),
        }
    }
}
