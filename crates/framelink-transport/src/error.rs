/// Errors that can occur in transport session operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The endpoint could not be turned into a session request.
    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// Opening a session needs a running async runtime.
    #[error("no async runtime available to drive the session")]
    NoRuntime,

    /// The transport refused to open a session.
    #[error("open rejected for {endpoint}: {reason}")]
    Rejected { endpoint: String, reason: String },

    /// The session is closed; nothing can be sent on it.
    #[error("session closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;
