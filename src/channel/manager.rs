//! Command channel session manager.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use super::handler::CommandHandler;
use crate::error::{GatewayError, Result};
use crate::protocol::{codec, Command, ReconnectPolicy};
use crate::transport::{
    display_endpoint, CloseReason, CommandTransport, Connection, SessionLink, TransportEvent,
};

const CLIENT_CLOSED: &str = "client closed";
const AUTHENTICATION_FAILED: &str = "authentication error";
const GATEWAY_DISCONNECT: &str = "disconnect";

/// Command channel lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No connection and none being made
    Disconnected,
    /// First connect in progress
    Connecting,
    /// Live connection
    Connected,
    /// Connection dropped, reconnect loop running
    Reconnecting,
    /// Closed by the client; terminal
    Closed,
}

impl ChannelState {
    /// Whether a session is live or being (re)established
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Reconnecting)
    }
}

/// Durable command channel to the gateway.
///
/// Owns at most one live connection. Inbound events are consumed by a single
/// driver task, which also runs reconnection after abnormal closures, so
/// handler callbacks are serialized and reconnection is single-flight.
pub struct CommandChannel {
    inner: Arc<Inner>,
}

struct Inner {
    id: Uuid,
    uri: Url,
    transport: Arc<dyn CommandTransport>,
    /// Held for the whole connect loop
    policy: AsyncMutex<ReconnectPolicy>,
    link: Mutex<Option<Arc<dyn SessionLink>>>,
    state: Mutex<ChannelState>,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
    driver: AsyncMutex<Option<JoinHandle<()>>>,
}

enum Step {
    Event(TransportEvent),
    Lost,
    Shutdown,
}

impl CommandChannel {
    /// Create a channel that connects to `uri` through `transport`.
    pub fn new(uri: Url, transport: Arc<dyn CommandTransport>, policy: ReconnectPolicy) -> Self {
        let (shutdown, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                uri,
                transport,
                policy: AsyncMutex::new(policy),
                link: Mutex::new(None),
                state: Mutex::new(ChannelState::Disconnected),
                closed: AtomicBool::new(false),
                shutdown,
                driver: AsyncMutex::new(None),
            }),
        }
    }

    /// Connect and start delivering events to `handler`.
    ///
    /// Retries transient failures with backoff. Returns once a connection is
    /// live, or with [`GatewayError::ConnectFailed`] once the policy gives up.
    pub async fn connect<H: CommandHandler>(&self, handler: H) -> Result<()> {
        let inner = &self.inner;
        if inner.is_closed() {
            return Err(GatewayError::Closed);
        }

        let mut driver = inner.driver.lock().await;
        if inner.state().is_active() {
            return Err(GatewayError::AlreadyConnected);
        }

        info!(
            channel = %inner.id,
            endpoint = %display_endpoint(&inner.uri),
            transport = inner.transport.name(),
            "Connecting command channel"
        );
        inner.set_state(ChannelState::Connecting);

        let connection = match inner.establish().await {
            Ok(connection) => connection,
            Err(e) => {
                inner.set_state(ChannelState::Disconnected);
                return Err(e);
            },
        };
        let events = inner.install(connection).await?;

        let handler: Arc<dyn CommandHandler> = Arc::new(handler);
        *driver = Some(tokio::spawn(Arc::clone(inner).drive(events, handler)));
        Ok(())
    }

    /// Send a text message to the gateway.
    pub async fn send(&self, text: impl Into<String>) -> Result<()> {
        if self.inner.is_closed() {
            return Err(GatewayError::Closed);
        }

        let link = self.inner.link.lock().clone();
        let link = link.ok_or(GatewayError::NotConnected)?;
        let text = text.into();
        debug!(channel = %self.inner.id, len = text.len(), "Sending message");
        link.send_text(text).await
    }

    /// Close the channel.
    ///
    /// Stops any pending reconnect and closes the live connection with a
    /// normal closure. Idempotent; later `send`/`connect` fail with
    /// [`GatewayError::Closed`].
    pub async fn close(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(channel = %inner.id, "Closing command channel");
        inner.shutdown.send_replace(true);
        *inner.state.lock() = ChannelState::Closed;

        let link = inner.link.lock().take();
        if let Some(link) = link {
            if let Err(e) = link.close(CloseReason::normal(CLIENT_CLOSED)).await {
                debug!(channel = %inner.id, error = %e, "Close frame not delivered");
            }
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ChannelState {
        self.inner.state()
    }

    /// Whether `close` was called
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Channel endpoint, including credentials
    pub fn uri(&self) -> &Url {
        &self.inner.uri
    }

    /// Channel ID used in log events
    pub fn id(&self) -> Uuid {
        self.inner.id
    }
}

impl std::fmt::Debug for CommandChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandChannel")
            .field("id", &self.inner.id)
            .field("endpoint", &display_endpoint(&self.inner.uri))
            .field("state", &self.inner.state())
            .finish()
    }
}

impl Drop for CommandChannel {
    fn drop(&mut self) {
        // The driver closes the link once it sees the signal
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.shutdown.send_replace(true);
    }
}

impl Inner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    /// Move to `next` unless the channel is closed.
    fn set_state(&self, next: ChannelState) {
        let mut state = self.state.lock();
        if *state == ChannelState::Closed || *state == next {
            return;
        }
        info!(channel = %self.id, from = ?*state, to = ?next, "Channel state changed");
        *state = next;
    }

    /// Run the connect loop until a connection is live or the policy gives up.
    async fn establish(&self) -> Result<Connection> {
        let mut policy = self.policy.lock().await;
        policy.reset();

        let mut shutdown = self.shutdown.subscribe();
        let mut attempts: u32 = 0;

        loop {
            let delay = policy.current_delay();
            if !delay.is_zero() {
                debug!(channel = %self.id, delay_ms = delay.as_millis() as u64, "Backing off");
            }
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|closed| *closed) => return Err(GatewayError::Closed),
                () = policy.delay() => {},
            }

            attempts += 1;
            let attempt = tokio::select! {
                biased;
                _ = shutdown.wait_for(|closed| *closed) => return Err(GatewayError::Closed),
                attempt = self.transport.connect(self.uri.clone()) => attempt,
            };

            match attempt {
                Ok(connection) => {
                    policy.reset();
                    debug!(channel = %self.id, attempt = attempts, "Connection established");
                    return Ok(connection);
                },
                Err(e) => {
                    warn!(channel = %self.id, attempt = attempts, error = %e, "Connection attempt failed");
                    policy.observe_error(e);
                    if !policy.should_retry() {
                        break;
                    }
                },
            }
        }

        let source = policy
            .last_error()
            .unwrap_or_else(|| Arc::new(GatewayError::NotConnected));
        Err(GatewayError::ConnectFailed { attempts, source })
    }

    /// Make `connection` the live one, unless the channel was closed meanwhile.
    async fn install(
        &self,
        connection: Connection,
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>> {
        let Connection { link, events } = connection;

        {
            let mut slot = self.link.lock();
            // `close` flips the flag before taking the link, so checking it
            // under the lock leaves no window for a leaked connection
            if !self.is_closed() {
                *slot = Some(link);
                drop(slot);
                self.set_state(ChannelState::Connected);
                return Ok(events);
            }
        }

        let _ = link.close(CloseReason::normal(CLIENT_CLOSED)).await;
        Err(GatewayError::Closed)
    }

    async fn drive(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        handler: Arc<dyn CommandHandler>,
    ) {
        let mut shutdown = self.shutdown.subscribe();
        // Set once a command ended the session; the next closure is final
        let mut ending = false;

        loop {
            let step = tokio::select! {
                biased;
                _ = shutdown.wait_for(|closed| *closed) => Step::Shutdown,
                event = events.recv() => event.map_or(Step::Lost, Step::Event),
            };

            let reason = match step {
                Step::Event(TransportEvent::Text(text)) => {
                    if ending {
                        debug!(channel = %self.id, "Ignoring message after session end");
                    } else {
                        ending = self.dispatch(&text, handler.as_ref()).await;
                    }
                    continue;
                },
                Step::Event(TransportEvent::Error(e)) => {
                    warn!(channel = %self.id, error = %e, "Transport error");
                    handler.on_error(e);
                    continue;
                },
                Step::Event(TransportEvent::Closed(reason)) => reason,
                Step::Lost => CloseReason::abnormal("event stream ended"),
                Step::Shutdown => {
                    let link = self.link.lock().take();
                    if let Some(link) = link {
                        let _ = link.close(CloseReason::normal(CLIENT_CLOSED)).await;
                    }
                    handler.on_disconnect();
                    return;
                },
            };

            self.link.lock().take();

            if self.is_closed() || ending || reason.is_normal() {
                info!(channel = %self.id, reason = %reason, "Command channel disconnected");
                self.set_state(ChannelState::Disconnected);
                handler.on_disconnect();
                return;
            }

            warn!(channel = %self.id, reason = %reason, "Connection lost, reconnecting");
            self.set_state(ChannelState::Reconnecting);

            let connection = match self.establish().await {
                Ok(connection) => connection,
                Err(GatewayError::Closed) => {
                    handler.on_disconnect();
                    return;
                },
                Err(e) => {
                    warn!(channel = %self.id, error = %e, "Reconnect failed, giving up");
                    self.set_state(ChannelState::Disconnected);
                    handler.on_error(e);
                    handler.on_disconnect();
                    return;
                },
            };

            match self.install(connection).await {
                Ok(next) => {
                    events = next;
                    ending = false;
                },
                Err(_) => {
                    handler.on_disconnect();
                    return;
                },
            }
        }
    }

    /// Decode and deliver one message. Returns whether the command ended the session.
    async fn dispatch(&self, text: &str, handler: &dyn CommandHandler) -> bool {
        let command = match codec::parse(text) {
            Ok(command) => command,
            Err(e) => {
                warn!(channel = %self.id, error = %e, "Dropping undecodable message");
                handler.on_error(e);
                return false;
            },
        };
        debug!(channel = %self.id, command = %command, "Command received");

        match command {
            Command::AuthenticationSuccess => handler.on_connect(),
            Command::AuthenticationError => {
                self.close_link(CloseReason::normal(AUTHENTICATION_FAILED)).await;
                handler.on_error(GatewayError::Authentication);
                return true;
            },
            Command::Disconnect { reason } => {
                self.close_link(CloseReason::normal(GATEWAY_DISCONNECT)).await;
                let reason = reason.unwrap_or_else(|| "no reason given".to_string());
                handler.on_error(GatewayError::Disconnected(reason));
                return true;
            },
            command @ (Command::GetHtml(_) | Command::GetResource(_)) => handler.on_command(command),
        }
        false
    }

    /// Close the live connection. Its next `Closed` event ends the driver,
    /// whichever side's closure arrives first.
    async fn close_link(&self, reason: CloseReason) {
        let link = self.link.lock().clone();
        if let Some(link) = link {
            if let Err(e) = link.close(reason).await {
                debug!(channel = %self.id, error = %e, "Close frame not delivered");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::channel::ChannelEvent;
    use crate::protocol::ResourceRequest;
    use crate::transport::{MemoryServer, MemoryTransport};

    fn channel() -> (CommandChannel, MemoryServer) {
        let (transport, server) = MemoryTransport::new();
        let uri = Url::parse("ws://localhost/cmd/websocket?key=k&projectId=p").unwrap();
        let channel = CommandChannel::new(uri, Arc::new(transport), ReconnectPolicy::new());
        (channel, server)
    }

    fn refused() -> GatewayError {
        GatewayError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionRefused))
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> ChannelEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("handler dropped")
    }

    #[tokio::test]
    async fn test_connect_and_dispatch() {
        let (channel, server) = channel();
        let (tx, mut rx) = mpsc::unbounded_channel::<ChannelEvent>();

        channel.connect(tx).await.unwrap();
        assert_eq!(channel.state(), ChannelState::Connected);

        server.push_text(r#"{"cmd":"authenticationSuccess"}"#);
        server.push_text(r#"{"cmd":"getHtml","rid":"1","uri":"/index.html"}"#);

        assert!(matches!(next(&mut rx).await, ChannelEvent::Connected));
        match next(&mut rx).await {
            ChannelEvent::Command(command) => {
                assert_eq!(command, Command::GetHtml(ResourceRequest::new("1", "/index.html")));
            },
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_decode_error_keeps_channel_open() {
        let (channel, server) = channel();
        let (tx, mut rx) = mpsc::unbounded_channel::<ChannelEvent>();
        channel.connect(tx).await.unwrap();

        server.push_text("not json");
        server.push_text(r#"{"cmd":"getResource","rid":"2","uri":"/a.css"}"#);

        assert!(matches!(next(&mut rx).await, ChannelEvent::Error(GatewayError::Decode(_))));
        assert!(matches!(next(&mut rx).await, ChannelEvent::Command(_)));
        assert_eq!(channel.state(), ChannelState::Connected);
    }

    #[tokio::test]
    async fn test_authentication_error_closes_without_reconnect() {
        let (channel, server) = channel();
        let (tx, mut rx) = mpsc::unbounded_channel::<ChannelEvent>();
        channel.connect(tx).await.unwrap();

        server.push_text(r#"{"cmd":"authenticationError"}"#);

        assert!(matches!(next(&mut rx).await, ChannelEvent::Error(GatewayError::Authentication)));
        assert!(matches!(next(&mut rx).await, ChannelEvent::Disconnected));
        assert_eq!(server.close_requests(), vec![CloseReason::normal("authentication error")]);
        assert_eq!(server.connections(), 1);
        assert_eq!(channel.state(), ChannelState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_command_reports_reason() {
        let (channel, server) = channel();
        let (tx, mut rx) = mpsc::unbounded_channel::<ChannelEvent>();
        channel.connect(tx).await.unwrap();

        server.push_text(r#"{"cmd":"disconnect","message":"maintenance"}"#);

        match next(&mut rx).await {
            ChannelEvent::Error(GatewayError::Disconnected(reason)) => assert_eq!(reason, "maintenance"),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(next(&mut rx).await, ChannelEvent::Disconnected));
        assert_eq!(server.connections(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_authentication_error_survives_gateway_policy_close() {
        let (channel, server) = channel();
        let (tx, mut rx) = mpsc::unbounded_channel::<ChannelEvent>();
        channel.connect(tx).await.unwrap();

        // Gateway closes with 1008 before the client's own close is echoed
        server.push_text(r#"{"cmd":"authenticationError"}"#);
        server.close_connection(CloseReason::new(1008, "bad key"));

        assert!(matches!(next(&mut rx).await, ChannelEvent::Error(GatewayError::Authentication)));
        assert!(matches!(next(&mut rx).await, ChannelEvent::Disconnected));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(server.connections(), 1);
        assert_eq!(server.attempts().len(), 1);
        assert_eq!(channel.state(), ChannelState::Disconnected);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_command_survives_dropped_connection() {
        let (channel, server) = channel();
        let (tx, mut rx) = mpsc::unbounded_channel::<ChannelEvent>();
        channel.connect(tx).await.unwrap();

        server.push_text(r#"{"cmd":"disconnect","message":"bye"}"#);
        server.drop_connection();

        assert!(matches!(next(&mut rx).await, ChannelEvent::Error(GatewayError::Disconnected(_))));
        assert!(matches!(next(&mut rx).await, ChannelEvent::Disconnected));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(server.connections(), 1);
        assert_eq!(channel.state(), ChannelState::Disconnected);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_commands_after_session_end_are_ignored() {
        let (channel, server) = channel();
        let (tx, mut rx) = mpsc::unbounded_channel::<ChannelEvent>();
        channel.connect(tx).await.unwrap();

        server.push_text(r#"{"cmd":"authenticationError"}"#);
        server.push_text(r#"{"cmd":"getHtml","rid":"1","uri":"/"}"#);

        assert!(matches!(next(&mut rx).await, ChannelEvent::Error(GatewayError::Authentication)));
        assert!(matches!(next(&mut rx).await, ChannelEvent::Disconnected));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_normal_closure_does_not_reconnect() {
        let (channel, server) = channel();
        let (tx, mut rx) = mpsc::unbounded_channel::<ChannelEvent>();
        channel.connect(tx).await.unwrap();

        server.close_connection(CloseReason::normal("bye"));

        assert!(matches!(next(&mut rx).await, ChannelEvent::Disconnected));
        assert_eq!(server.connections(), 1);
        assert!(matches!(channel.send("x").await, Err(GatewayError::NotConnected)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abnormal_closure_reconnects() {
        let (channel, server) = channel();
        let (tx, mut rx) = mpsc::unbounded_channel::<ChannelEvent>();
        channel.connect(tx).await.unwrap();

        server.fail_next_connect(refused());
        server.drop_connection();
        server.wait_for_connections(2).await;

        server.push_text(r#"{"cmd":"authenticationSuccess"}"#);
        assert!(matches!(next(&mut rx).await, ChannelEvent::Connected));
        assert_eq!(server.attempts().len(), 3);
        assert_eq!(channel.state(), ChannelState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_gives_up_on_permanent_error() {
        let (channel, server) = channel();
        let (tx, mut rx) = mpsc::unbounded_channel::<ChannelEvent>();
        channel.connect(tx).await.unwrap();

        server.fail_next_connect(GatewayError::Handshake("HTTP 401".into()));
        server.drop_connection();

        match next(&mut rx).await {
            ChannelEvent::Error(GatewayError::ConnectFailed { attempts, source }) => {
                assert_eq!(attempts, 1);
                assert!(matches!(*source, GatewayError::Handshake(_)));
            },
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(next(&mut rx).await, ChannelEvent::Disconnected));
        assert_eq!(channel.state(), ChannelState::Disconnected);
    }

    #[tokio::test]
    async fn test_initial_connect_failure() {
        let (channel, server) = channel();
        server.fail_next_connect(GatewayError::Handshake("HTTP 403".into()));

        let (tx, _rx) = mpsc::unbounded_channel::<ChannelEvent>();
        let err = channel.connect(tx).await.unwrap_err();
        assert!(matches!(err, GatewayError::ConnectFailed { attempts: 1, .. }));
        assert_eq!(channel.state(), ChannelState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_twice() {
        let (channel, _server) = channel();
        let (tx, _rx) = mpsc::unbounded_channel::<ChannelEvent>();
        channel.connect(tx.clone()).await.unwrap();

        assert!(matches!(channel.connect(tx).await, Err(GatewayError::AlreadyConnected)));
    }

    #[tokio::test]
    async fn test_send_forwards_to_link() {
        let (channel, server) = channel();
        let (tx, _rx) = mpsc::unbounded_channel::<ChannelEvent>();

        assert!(matches!(channel.send("early").await, Err(GatewayError::NotConnected)));
        channel.connect(tx).await.unwrap();
        channel.send("hello").await.unwrap();
        assert_eq!(server.sent(), vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (channel, server) = channel();
        let (tx, mut rx) = mpsc::unbounded_channel::<ChannelEvent>();
        channel.connect(tx.clone()).await.unwrap();

        channel.close().await;
        channel.close().await;

        assert!(matches!(next(&mut rx).await, ChannelEvent::Disconnected));
        assert_eq!(server.close_requests(), vec![CloseReason::normal("client closed")]);
        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(matches!(channel.send("x").await, Err(GatewayError::Closed)));
        assert!(matches!(channel.connect(tx).await, Err(GatewayError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_interrupts_backoff() {
        let (channel, server) = channel();
        let (tx, mut rx) = mpsc::unbounded_channel::<ChannelEvent>();
        channel.connect(tx).await.unwrap();

        // Keep failing so the driver sits in the backoff
        for _ in 0..10 {
            server.fail_next_connect(refused());
        }
        server.drop_connection();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(channel.state(), ChannelState::Reconnecting);

        channel.close().await;
        assert!(matches!(next(&mut rx).await, ChannelEvent::Disconnected));
        assert!(rx.try_recv().is_err());
    }
}
