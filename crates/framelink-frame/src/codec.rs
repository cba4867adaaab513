use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Tag byte of a raw binary payload frame.
pub const FRAME_TAG: u8 = 0x01;

/// Frame header: tag (1) + confidence (1) = 2 bytes.
pub const HEADER_SIZE: usize = 2;

/// Confidence used until the caller sets one.
pub const DEFAULT_CONFIDENCE: f64 = 0.25;

// 0.57 * 100.0 is 56.99999999999999 in f64. Products within this distance
// below a whole percent count as reaching it; real inputs sit far further
// away, 0.99999999999 still encodes as 99.
const FLOOR_TOLERANCE: f64 = 1e-12;

/// Encode a fractional confidence as the header's integer percentage.
///
/// Truncates (`floor(confidence * 100)`), never rounds: 0.999 encodes as 99.
/// Values outside `[0, 1]` are not clamped, 1.5 encodes as 150. The final
/// narrowing to a byte saturates, so negative values and NaN encode as 0 and
/// anything from 2.56 up encodes as 255.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn confidence_byte(confidence: f64) -> u8 {
    (confidence * 100.0 + FLOOR_TOLERANCE).floor() as u8
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌───────────┬──────────────┬──────────────────────┐
/// │ Tag (1B)  │ Confidence   │ Payload              │
/// │ 0x01      │ (1B, 0-100)  │ (rest of message)    │
/// └───────────┴──────────────┴──────────────────────┘
/// ```
///
/// There is no length prefix: the transport's message boundary is the frame
/// boundary.
pub fn encode_frame(payload: &[u8], confidence: f64, dst: &mut BytesMut) {
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u8(FRAME_TAG);
    dst.put_u8(confidence_byte(confidence));
    dst.put_slice(payload);
}

/// Builds outbound frames with the current confidence.
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    confidence: f64,
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE)
    }
}

impl FrameEncoder {
    /// Create an encoder with an initial confidence.
    pub fn new(confidence: f64) -> Self {
        Self { confidence }
    }

    /// Set the confidence used by subsequent frames.
    pub fn set_confidence(&mut self, confidence: f64) {
        self.confidence = confidence;
    }

    /// Current confidence.
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Encode `payload` into a complete frame.
    pub fn encode(&self, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        encode_frame(payload, self.confidence, &mut buf);
        buf.freeze()
    }
}

/// A parsed frame, as seen by the receiving peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame type tag.
    pub tag: u8,
    /// Confidence percentage from the header.
    pub confidence: u8,
    /// The raw payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a payload frame.
    pub fn new(confidence: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            tag: FRAME_TAG,
            confidence,
            payload: payload.into(),
        }
    }

    /// Parse one complete frame from a transport message body.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(FrameError::Truncated {
                len: data.len(),
                header: HEADER_SIZE,
            });
        }
        if data[0] != FRAME_TAG {
            return Err(FrameError::UnknownTag(data[0]));
        }

        Ok(Self {
            tag: data[0],
            confidence: data[1],
            payload: Bytes::copy_from_slice(&data[HEADER_SIZE..]),
        })
    }

    /// Confidence as a fraction.
    pub fn confidence_ratio(&self) -> f64 {
        f64::from(self.confidence) / 100.0
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}
