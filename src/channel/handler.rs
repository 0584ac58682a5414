//! Application callbacks for the command channel.

use tokio::sync::mpsc;

use crate::error::GatewayError;
use crate::protocol::Command;

/// Receives command channel events.
///
/// All callbacks for one channel are invoked from a single task, one at a
/// time and in arrival order. Keep them short; long work should be handed
/// off to another task.
pub trait CommandHandler: Send + Sync + 'static {
    /// Gateway accepted the credentials.
    fn on_connect(&self);

    /// Channel stopped and will not reconnect on its own.
    fn on_disconnect(&self);

    /// Gateway requested content (`GetHtml` / `GetResource`).
    fn on_command(&self, command: Command);

    /// Something went wrong: undecodable message, rejected credentials,
    /// gateway-initiated disconnect, transport error or failed reconnect.
    fn on_error(&self, error: GatewayError);
}

/// Handler event, for consumers that prefer a channel over callbacks.
#[derive(Debug)]
pub enum ChannelEvent {
    /// See [`CommandHandler::on_connect`].
    Connected,
    /// See [`CommandHandler::on_disconnect`].
    Disconnected,
    /// See [`CommandHandler::on_command`].
    Command(Command),
    /// See [`CommandHandler::on_error`].
    Error(GatewayError),
}

/// Forwards every callback as a [`ChannelEvent`].
///
/// ```rust,ignore
/// let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
/// client.connect(tx).await?;
/// while let Some(event) = rx.recv().await { /* ... */ }
/// ```
impl CommandHandler for mpsc::UnboundedSender<ChannelEvent> {
    fn on_connect(&self) {
        let _ = self.send(ChannelEvent::Connected);
    }

    fn on_disconnect(&self) {
        let _ = self.send(ChannelEvent::Disconnected);
    }

    fn on_command(&self, command: Command) {
        let _ = self.send(ChannelEvent::Command(command));
    }

    fn on_error(&self, error: GatewayError) {
        let _ = self.send(ChannelEvent::Error(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ResourceRequest;

    #[test]
    fn test_sender_forwards_events_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.on_connect();
        tx.on_command(Command::GetHtml(ResourceRequest::new("1", "/")));
        tx.on_error(GatewayError::Authentication);
        tx.on_disconnect();

        assert!(matches!(rx.try_recv(), Ok(ChannelEvent::Connected)));
        assert!(matches!(rx.try_recv(), Ok(ChannelEvent::Command(Command::GetHtml(_)))));
        assert!(matches!(rx.try_recv(), Ok(ChannelEvent::Error(GatewayError::Authentication))));
        assert!(matches!(rx.try_recv(), Ok(ChannelEvent::Disconnected)));
    }
}
