//! WebSocket command channel transport.
//!
//! Connects with tokio-tungstenite, splits the socket, and runs a reader task
//! that turns frames into [`TransportEvent`]s. An optional heartbeat task
//! sends unsolicited Pong frames so idle intermediaries keep the socket open.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use super::{display_endpoint, CloseReason, CommandTransport, Connection, SessionLink, TransportEvent};
use crate::error::Result;

/// Default interval between heartbeat Pong frames
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(40);

/// Close code used when the peer sent a close frame without a status
const NO_STATUS_RECEIVED: u16 = 1005;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// WebSocket transport for the command channel.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    heartbeat_interval: Duration,
}

impl WebSocketTransport {
    /// Create a transport with the default heartbeat interval.
    pub fn new() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }

    /// Set the heartbeat interval. Zero disables the heartbeat.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Configured heartbeat interval
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandTransport for WebSocketTransport {
    fn connect(&self, uri: Url) -> Pin<Box<dyn Future<Output = Result<Connection>> + Send + '_>> {
        let heartbeat_interval = self.heartbeat_interval;

        Box::pin(async move {
            let endpoint = display_endpoint(&uri);
            debug!(endpoint = %endpoint, "Opening WebSocket");

            let (ws, _response) = connect_async(uri.as_str()).await?;
            let (sink, stream) = ws.split();
            let sink = Arc::new(Mutex::new(sink));

            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let reader = tokio::spawn(read_loop(stream, events_tx));
            let heartbeat = (!heartbeat_interval.is_zero())
                .then(|| tokio::spawn(heartbeat_loop(Arc::clone(&sink), heartbeat_interval)));

            info!(endpoint = %endpoint, "WebSocket connected");

            let link = WebSocketLink {
                sink,
                reader,
                heartbeat,
            };
            Ok(Connection {
                link: Arc::new(link),
                events: events_rx,
            })
        })
    }

    fn name(&self) -> &'static str {
        "WebSocket"
    }
}

struct WebSocketLink {
    sink: Arc<Mutex<WsSink>>,
    reader: JoinHandle<()>,
    heartbeat: Option<JoinHandle<()>>,
}

impl SessionLink for WebSocketLink {
    fn send_text(&self, text: String) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.sink.lock().await.send(Message::Text(text)).await?;
            Ok(())
        })
    }

    fn close(&self, reason: CloseReason) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if let Some(heartbeat) = &self.heartbeat {
                heartbeat.abort();
            }

            let frame = CloseFrame {
                code: CloseCode::from(reason.code),
                reason: reason.reason.into(),
            };
            self.sink.lock().await.send(Message::Close(Some(frame))).await?;
            Ok(())
        })
    }
}

impl Drop for WebSocketLink {
    fn drop(&mut self) {
        if let Some(heartbeat) = &self.heartbeat {
            heartbeat.abort();
        }
        self.reader.abort();
    }
}

/// Reader loop - runs in a spawned task until the socket closes.
async fn read_loop(mut stream: WsStream, events: mpsc::UnboundedSender<TransportEvent>) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if events.send(TransportEvent::Text(text)).is_err() {
                    // Nobody is listening anymore
                    return;
                }
            },
            Ok(Message::Close(frame)) => {
                let reason = frame
                    .map(|f| CloseReason::new(u16::from(f.code), f.reason.into_owned()))
                    .unwrap_or_else(|| CloseReason::new(NO_STATUS_RECEIVED, ""));
                debug!(reason = %reason, "Close frame received");
                let _ = events.send(TransportEvent::Closed(reason));
                return;
            },
            Ok(Message::Binary(data)) => {
                debug!(len = data.len(), "Ignoring binary frame");
            },
            Ok(_) => {
                // Ping/pong handled by tungstenite
            },
            Err(e) => {
                let message = e.to_string();
                warn!(error = %message, "WebSocket read failed");
                let _ = events.send(TransportEvent::Error(e.into()));
                let _ = events.send(TransportEvent::Closed(CloseReason::abnormal(message)));
                return;
            },
        }
    }

    let _ = events.send(TransportEvent::Closed(CloseReason::abnormal(
        "connection dropped without close frame",
    )));
}

/// Heartbeat loop - sends an unsolicited Pong every `interval`.
async fn heartbeat_loop(sink: Arc<Mutex<WsSink>>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    // First tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if let Err(e) = sink.lock().await.send(Message::Pong(Vec::new())).await {
            debug!(error = %e, "Heartbeat stopped");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_heartbeat() {
        let transport = WebSocketTransport::default();
        assert_eq!(transport.heartbeat_interval(), Duration::from_secs(40));
        assert_eq!(transport.name(), "WebSocket");
    }

    #[test]
    fn test_heartbeat_can_be_disabled() {
        let transport = WebSocketTransport::new().with_heartbeat_interval(Duration::ZERO);
        assert!(transport.heartbeat_interval().is_zero());
    }

    #[tokio::test]
    async fn test_connect_refused_is_transient() {
        // Bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let uri = Url::parse(&format!("ws://127.0.0.1:{port}/cmd/websocket")).unwrap();
        let err = WebSocketTransport::new().connect(uri).await.unwrap_err();
        assert!(err.is_transient(), "unexpected error: {err}");
    }
}
