//! Frame codec and message dispatch for framelink.
//!
//! Traffic is asymmetric. Outbound, every payload is wrapped in a two-byte
//! header:
//! - A 1-byte tag (`0x01`, raw binary payload)
//! - A 1-byte confidence percentage (`floor(confidence * 100)`)
//!
//! Inbound, every message is structured text, decoded as JSON and fanned out
//! to the registered listeners in registration order.

pub mod codec;
pub mod dispatch;
pub mod error;

pub use codec::{
    confidence_byte, encode_frame, Frame, FrameEncoder, DEFAULT_CONFIDENCE, FRAME_TAG, HEADER_SIZE,
};
pub use dispatch::{decode, Dispatched, Dispatcher, Listener};
pub use error::{DecodeError, FrameError, Result};
