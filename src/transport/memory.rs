//! In-memory transports for tests and embedding.
//!
//! [`MemoryTransport`] plays the gateway side of the command channel: every
//! successful `connect` creates a fresh in-memory connection, and the paired
//! [`MemoryServer`] pushes frames into the newest one, drops it, scripts
//! connect failures and inspects what the client sent.
//!
//! ```rust,ignore
//! let (transport, server) = MemoryTransport::new();
//! let channel = CommandChannel::new(uri, Arc::new(transport), ReconnectPolicy::new());
//! channel.connect(handler).await?;
//!
//! server.push_text(r#"{"cmd":"authenticationSuccess"}"#);
//! server.drop_connection();          // abnormal closure, client reconnects
//! server.wait_for_connections(2).await;
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use url::Url;

use super::{
    CloseReason, CommandTransport, Connection, RawResponse, SessionLink, TransportEvent,
    UploadTransport,
};
use crate::error::{GatewayError, Result};
use crate::upload::UploadRequest;

#[derive(Default)]
struct MemoryState {
    /// Scripted connect failures, consumed front to back
    failures: VecDeque<GatewayError>,
    /// Every URI `connect` was called with
    attempts: Vec<Url>,
    /// Event sender of the newest connection
    current: Option<mpsc::UnboundedSender<TransportEvent>>,
    /// Text sent by the client, across all connections
    sent: Vec<String>,
    /// Close reasons requested by the client
    close_requests: Vec<CloseReason>,
}

/// In-memory command channel transport.
#[derive(Clone)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
    connections: Arc<watch::Sender<usize>>,
}

/// Gateway-side controller for a [`MemoryTransport`].
#[derive(Clone)]
pub struct MemoryServer {
    state: Arc<Mutex<MemoryState>>,
    connections: watch::Receiver<usize>,
}

impl MemoryTransport {
    /// Create a transport and its controller.
    pub fn new() -> (Self, MemoryServer) {
        let state = Arc::new(Mutex::new(MemoryState::default()));
        let (connections_tx, connections_rx) = watch::channel(0);

        let transport = Self {
            state: Arc::clone(&state),
            connections: Arc::new(connections_tx),
        };
        let server = MemoryServer {
            state,
            connections: connections_rx,
        };
        (transport, server)
    }
}

impl CommandTransport for MemoryTransport {
    fn connect(&self, uri: Url) -> Pin<Box<dyn Future<Output = Result<Connection>> + Send + '_>> {
        Box::pin(async move {
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            {
                let mut state = self.state.lock();
                state.attempts.push(uri);
                if let Some(error) = state.failures.pop_front() {
                    return Err(error);
                }
                state.current = Some(events_tx.clone());
            }
            self.connections.send_modify(|count| *count += 1);

            let link = MemoryLink {
                state: Arc::clone(&self.state),
                events: events_tx,
            };
            Ok(Connection {
                link: Arc::new(link),
                events: events_rx,
            })
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryLink {
    state: Arc<Mutex<MemoryState>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl SessionLink for MemoryLink {
    fn send_text(&self, text: String) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.events.is_closed() {
                return Err(GatewayError::Connection("connection is closed".to_string()));
            }
            self.state.lock().sent.push(text);
            Ok(())
        })
    }

    fn close(&self, reason: CloseReason) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.state.lock().close_requests.push(reason.clone());
            // The gateway echoes the close
            let _ = self.events.send(TransportEvent::Closed(reason));
            Ok(())
        })
    }
}

impl MemoryServer {
    /// Make the next `connect` call fail with `error`.
    pub fn fail_next_connect(&self, error: GatewayError) {
        self.state.lock().failures.push_back(error);
    }

    /// Deliver a text frame on the newest connection.
    pub fn push_text(&self, text: impl Into<String>) {
        self.push(TransportEvent::Text(text.into()));
    }

    /// Deliver a transport error notification on the newest connection.
    pub fn push_error(&self, error: GatewayError) {
        self.push(TransportEvent::Error(error));
    }

    /// Close the newest connection from the gateway side.
    pub fn close_connection(&self, reason: CloseReason) {
        self.push(TransportEvent::Closed(reason));
    }

    /// Drop the newest connection without a close frame.
    pub fn drop_connection(&self) {
        self.close_connection(CloseReason::abnormal("connection reset"));
    }

    /// URIs of every connect attempt, successful or not
    pub fn attempts(&self) -> Vec<Url> {
        self.state.lock().attempts.clone()
    }

    /// Number of successful connects
    pub fn connections(&self) -> usize {
        *self.connections.borrow()
    }

    /// Wait until at least `count` connects succeeded.
    pub async fn wait_for_connections(&self, count: usize) {
        let mut connections = self.connections.clone();
        let _ = connections.wait_for(|n| *n >= count).await;
    }

    /// Text the client sent so far
    pub fn sent(&self) -> Vec<String> {
        self.state.lock().sent.clone()
    }

    /// Close reasons the client requested so far
    pub fn close_requests(&self) -> Vec<CloseReason> {
        self.state.lock().close_requests.clone()
    }

    fn push(&self, event: TransportEvent) {
        if let Some(current) = &self.state.lock().current {
            let _ = current.send(event);
        }
    }
}

/// An upload waiting for the test to answer it.
pub struct PendingUpload {
    /// The request as the client built it.
    pub request: UploadRequest,
    respond: oneshot::Sender<Result<RawResponse>>,
}

impl PendingUpload {
    /// Answer the upload.
    pub fn respond(self, response: Result<RawResponse>) {
        let _ = self.respond.send(response);
    }
}

enum UploadMode {
    Fixed(RawResponse),
    Manual(mpsc::UnboundedSender<PendingUpload>),
}

/// In-memory upload transport.
#[derive(Clone)]
pub struct MemoryUploadTransport {
    mode: Arc<UploadMode>,
    requests: Arc<Mutex<Vec<UploadRequest>>>,
}

/// Controller for a manually answered [`MemoryUploadTransport`].
pub struct UploadServer {
    pending: mpsc::UnboundedReceiver<PendingUpload>,
}

impl MemoryUploadTransport {
    /// Answer every upload with the same response.
    pub fn fixed(response: RawResponse) -> Self {
        Self {
            mode: Arc::new(UploadMode::Fixed(response)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Hold every upload until the controller answers it.
    pub fn manual() -> (Self, UploadServer) {
        let (pending_tx, pending_rx) = mpsc::unbounded_channel();
        let transport = Self {
            mode: Arc::new(UploadMode::Manual(pending_tx)),
            requests: Arc::new(Mutex::new(Vec::new())),
        };
        (transport, UploadServer { pending: pending_rx })
    }

    /// Requests executed so far
    pub fn requests(&self) -> Vec<UploadRequest> {
        self.requests.lock().clone()
    }
}

impl UploadTransport for MemoryUploadTransport {
    fn execute(
        &self,
        request: UploadRequest,
    ) -> Pin<Box<dyn Future<Output = Result<RawResponse>> + Send + 'static>> {
        self.requests.lock().push(request.clone());

        match &*self.mode {
            UploadMode::Fixed(response) => {
                let response = response.clone();
                Box::pin(async move { Ok(response) })
            },
            UploadMode::Manual(pending) => {
                let (respond, answer) = oneshot::channel();
                let queued = pending.send(PendingUpload { request, respond }).is_ok();
                Box::pin(async move {
                    if !queued {
                        return Err(GatewayError::Network("upload server is gone".to_string()));
                    }
                    answer.await.unwrap_or_else(|_| {
                        Err(GatewayError::Network("upload was never answered".to_string()))
                    })
                })
            },
        }
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

impl UploadServer {
    /// Next upload the client submitted, `None` once every transport is dropped.
    pub async fn next_request(&mut self) -> Option<PendingUpload> {
        self.pending.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri() -> Url {
        Url::parse("ws://localhost/cmd/websocket").unwrap()
    }

    #[tokio::test]
    async fn test_scripted_failure_then_success() {
        let (transport, server) = MemoryTransport::new();
        server.fail_next_connect(GatewayError::Connection("refused".into()));

        assert!(transport.connect(uri()).await.is_err());
        assert!(transport.connect(uri()).await.is_ok());
        assert_eq!(server.attempts().len(), 2);
        assert_eq!(server.connections(), 1);
    }

    #[tokio::test]
    async fn test_events_reach_newest_connection() {
        let (transport, server) = MemoryTransport::new();
        let mut first = transport.connect(uri()).await.unwrap();
        let mut second = transport.connect(uri()).await.unwrap();

        server.push_text("hello");
        match second.events.recv().await {
            Some(TransportEvent::Text(text)) => assert_eq!(text, "hello"),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(first.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_link_close_is_echoed() {
        let (transport, server) = MemoryTransport::new();
        let mut connection = transport.connect(uri()).await.unwrap();

        connection.link.send_text("ping".into()).await.unwrap();
        connection.link.close(CloseReason::normal("bye")).await.unwrap();

        assert_eq!(server.sent(), vec!["ping".to_string()]);
        assert_eq!(server.close_requests(), vec![CloseReason::normal("bye")]);
        match connection.events.recv().await {
            Some(TransportEvent::Closed(reason)) => assert!(reason.is_normal()),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
