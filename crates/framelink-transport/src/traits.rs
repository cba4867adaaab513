use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Result;

/// Identifier the connection manager assigns to each session it opens.
pub type SessionId = u64;

/// One message on the wire. The transport's own message boundary is the
/// frame boundary; no length prefix is added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Raw bytes (binary mode).
    Binary(Bytes),
    /// Transport-native text.
    Text(String),
}

impl Message {
    /// Number of payload bytes carried by this message.
    pub fn len(&self) -> usize {
        match self {
            Message::Binary(bytes) => bytes.len(),
            Message::Text(text) => text.len(),
        }
    }

    /// Returns true if the message carries no payload.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lifecycle and data events raised by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The asynchronous open completed.
    Opened,
    /// A message arrived from the remote side.
    Message(Message),
    /// The session is gone, whether the peer closed it or it never opened.
    Closed { reason: Option<String> },
    /// A transport-level failure. Does not by itself close the session.
    Error(String),
}

/// An event tagged with the session that raised it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEnvelope {
    pub session: SessionId,
    pub event: SessionEvent,
}

/// Handle a transport uses to report events for one session.
///
/// All sessions of a manager share the same queue; the session id lets the
/// manager tell current events apart from late ones.
#[derive(Debug, Clone)]
pub struct EventSender {
    session: SessionId,
    tx: mpsc::UnboundedSender<SessionEnvelope>,
}

impl EventSender {
    /// Create a sender that tags every event with `session`.
    pub fn new(session: SessionId, tx: mpsc::UnboundedSender<SessionEnvelope>) -> Self {
        Self { session, tx }
    }

    /// The session this sender reports for.
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Queue an event. Returns `false` once the receiving side is gone.
    pub fn emit(&self, event: SessionEvent) -> bool {
        self.tx
            .send(SessionEnvelope {
                session: self.session,
                event,
            })
            .is_ok()
    }
}

/// Create the event queue shared by every session of one manager.
pub fn event_channel() -> (
    mpsc::UnboundedSender<SessionEnvelope>,
    mpsc::UnboundedReceiver<SessionEnvelope>,
) {
    mpsc::unbounded_channel()
}

/// Opens sessions to an endpoint.
pub trait Transport {
    type Session: Session;

    /// Issue an open to `endpoint` and return the session handle immediately.
    ///
    /// Completion is asynchronous: the transport emits [`SessionEvent::Opened`]
    /// (or `Error` followed by `Closed`) through `events` later.
    fn open(&mut self, endpoint: &str, events: EventSender) -> Result<Self::Session>;
}

/// A live duplex session.
pub trait Session {
    /// Hand a message to the session for delivery.
    fn send(&mut self, message: Message) -> Result<()>;

    /// Close the session. Idempotent.
    fn close(&mut self);
}

impl<S: Session + ?Sized> Session for Box<S> {
    fn send(&mut self, message: Message) -> Result<()> {
        (**self).send(message)
    }

    fn close(&mut self) {
        (**self).close();
    }
}
