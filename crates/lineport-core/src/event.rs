//! Connection lifecycle events.

use crate::dispatch::Listener;

/// Something that happened on a connection.
///
/// Always delivered together with the endpoint it originated from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A complete message arrived, line breaks already restored
    MessageReceived(String),

    /// Handshake completed; the endpoint can send and receive
    Connected,

    /// Read loop exited; the socket is gone
    Ended,

    /// Connection attempt failed. Also fired for each retry while the
    /// endpoint keeps trying, so not every `Failed` is terminal.
    Failed(String),
}

impl ConnectionEvent {
    /// Invoke the listener callback matching this event.
    pub fn deliver<S: ?Sized>(&self, listener: &dyn Listener<S>, source: &S) {
        match self {
            Self::MessageReceived(text) => listener.message_received(source, text),
            Self::Connected => listener.connected(source),
            Self::Ended => listener.ended(source),
            Self::Failed(message) => listener.failed(source, message),
        }
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MessageReceived(_) => "message_received",
            Self::Connected => "connected",
            Self::Ended => "ended",
            Self::Failed(_) => "failed",
        }
    }
}
