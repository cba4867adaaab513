//! Duplex session contract for framelink.
//!
//! A session is a message-oriented channel with an asynchronous open and
//! four events: opened, message received, closed, error. This crate defines
//! that contract and two implementations of it:
//! - [`MemoryTransport`]: in-memory sessions driven by the caller
//! - [`WebSocketTransport`]: tokio-tungstenite client (feature `websocket`)
//!
//! This is the lowest layer of framelink. Everything else builds on the
//! [`Transport`] and [`Session`] traits defined here.

pub mod error;
pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod ws;

pub use error::{Result, TransportError};
pub use memory::{MemoryPeer, MemorySession, MemoryTransport};
pub use traits::{
    event_channel, EventSender, Message, Session, SessionEnvelope, SessionEvent, SessionId,
    Transport,
};

#[cfg(feature = "websocket")]
pub use ws::{WebSocketSession, WebSocketTransport};
