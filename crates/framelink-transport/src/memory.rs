//! In-memory transport.
//!
//! Sessions opened through [`MemoryTransport`] have no I/O behind them. The
//! remote side is played through [`MemoryPeer`]: complete the open, deliver
//! messages, raise errors, drop the connection, and inspect what was sent.
//! Everything is synchronous, so event order is exactly the order of calls.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{EventSender, Message, Session, SessionEvent, SessionId, Transport};

#[derive(Debug, Default)]
struct Shared {
    sessions: Vec<SessionRecord>,
    reject_next: Option<String>,
}

#[derive(Debug)]
struct SessionRecord {
    endpoint: String,
    events: EventSender,
    sent: Vec<Message>,
    closed_locally: bool,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Transport whose sessions live in memory. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryTransport {
    /// Create an empty transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions opened so far.
    pub fn opened(&self) -> usize {
        lock(&self.shared).sessions.len()
    }

    /// Number of sessions not closed locally.
    pub fn live(&self) -> usize {
        lock(&self.shared)
            .sessions
            .iter()
            .filter(|record| !record.closed_locally)
            .count()
    }

    /// Remote side of the `index`-th opened session.
    pub fn peer(&self, index: usize) -> Option<MemoryPeer> {
        if index < self.opened() {
            Some(MemoryPeer {
                shared: Arc::clone(&self.shared),
                index,
            })
        } else {
            None
        }
    }

    /// Remote side of the most recently opened session.
    pub fn last_peer(&self) -> Option<MemoryPeer> {
        self.opened()
            .checked_sub(1)
            .and_then(|index| self.peer(index))
    }

    /// Make the next `open` fail synchronously with `reason`.
    pub fn reject_next_open(&self, reason: impl Into<String>) {
        lock(&self.shared).reject_next = Some(reason.into());
    }
}

impl Transport for MemoryTransport {
    type Session = MemorySession;

    fn open(&mut self, endpoint: &str, events: EventSender) -> Result<MemorySession> {
        let mut shared = lock(&self.shared);
        if let Some(reason) = shared.reject_next.take() {
            return Err(TransportError::Rejected {
                endpoint: endpoint.to_string(),
                reason,
            });
        }

        let index = shared.sessions.len();
        debug!(endpoint, session = events.session(), "opening memory session");
        shared.sessions.push(SessionRecord {
            endpoint: endpoint.to_string(),
            events,
            sent: Vec::new(),
            closed_locally: false,
        });

        Ok(MemorySession {
            shared: Arc::clone(&self.shared),
            index,
        })
    }
}

/// Local handle of an in-memory session.
#[derive(Debug)]
pub struct MemorySession {
    shared: Arc<Mutex<Shared>>,
    index: usize,
}

impl Session for MemorySession {
    fn send(&mut self, message: Message) -> Result<()> {
        let mut shared = lock(&self.shared);
        let record = &mut shared.sessions[self.index];
        if record.closed_locally {
            return Err(TransportError::Closed);
        }
        record.sent.push(message);
        Ok(())
    }

    fn close(&mut self) {
        lock(&self.shared).sessions[self.index].closed_locally = true;
    }
}

/// Remote side of an in-memory session.
#[derive(Debug, Clone)]
pub struct MemoryPeer {
    shared: Arc<Mutex<Shared>>,
    index: usize,
}

impl MemoryPeer {
    fn emit(&self, event: SessionEvent) -> bool {
        let events = lock(&self.shared).sessions[self.index].events.clone();
        events.emit(event)
    }

    /// Complete the open.
    pub fn open(&self) -> bool {
        self.emit(SessionEvent::Opened)
    }

    /// Deliver a text message.
    pub fn deliver_text(&self, text: impl Into<String>) -> bool {
        self.emit(SessionEvent::Message(Message::Text(text.into())))
    }

    /// Deliver a binary message.
    pub fn deliver_binary(&self, bytes: impl Into<Bytes>) -> bool {
        self.emit(SessionEvent::Message(Message::Binary(bytes.into())))
    }

    /// Raise a transport error.
    pub fn fail(&self, detail: impl Into<String>) -> bool {
        self.emit(SessionEvent::Error(detail.into()))
    }

    /// Close the connection from the remote side.
    pub fn drop_connection(&self, reason: Option<&str>) -> bool {
        self.emit(SessionEvent::Closed {
            reason: reason.map(str::to_string),
        })
    }

    /// Session id assigned by the opener.
    pub fn session(&self) -> SessionId {
        lock(&self.shared).sessions[self.index].events.session()
    }

    /// Endpoint the session was opened to.
    pub fn endpoint(&self) -> String {
        lock(&self.shared).sessions[self.index].endpoint.clone()
    }

    /// Messages the local side sent, in order.
    pub fn sent(&self) -> Vec<Message> {
        lock(&self.shared).sessions[self.index].sent.clone()
    }

    /// Whether the local side closed the session.
    pub fn is_closed(&self) -> bool {
        lock(&self.shared).sessions[self.index].closed_locally
    }
}
