/// Failures reported by the connection manager.
///
/// None of these are returned from `connect`, `disconnect` or `send_frame`;
/// they reach the caller through a [`DiagnosticSink`](crate::DiagnosticSink).
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level error while opening or sending.
    #[error("transport error: {0}")]
    Transport(#[from] framelink_transport::TransportError),

    /// Error event raised by the live session.
    #[error("session error: {0}")]
    Session(String),

    /// Inbound message body could not be decoded; the message was dropped.
    #[error("decode error: {0}")]
    Decode(#[from] framelink_frame::DecodeError),

    /// Automatic reconnects gave up. A new explicit `connect` is needed.
    #[error("reconnect attempts exhausted after {attempts} attempts")]
    RetryExhausted { attempts: u32 },

    /// A message listener panicked while handling a message.
    #[error("message listener {index} panicked")]
    ListenerPanicked { index: usize },
}
