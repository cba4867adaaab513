/// Errors that can occur while parsing an outbound frame on the peer side.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Fewer bytes than the frame header.
    #[error("frame truncated ({len} bytes, header needs {header})")]
    Truncated { len: usize, header: usize },

    /// The tag byte is not a known frame type.
    #[error("unknown frame tag 0x{0:02x}")]
    UnknownTag(u8),
}

/// Errors that can occur while decoding an inbound message.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Inbound messages are structured text; binary bodies are not decoded.
    #[error("binary message ({len} bytes) where structured text was expected")]
    Binary { len: usize },

    /// The body is not well-formed JSON.
    #[error("malformed message body: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
