//! Wire frame structure and encoding/decoding

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

use crate::{
    checksum,
    command::FrameKind,
    constants::UNSOLICITED_CORRELATION_ID,
    error::{Error, Result},
};

/// Protocol frame
///
/// # Frame Structure
///
/// ```text
/// ┌─────────────┬─────────────┬───────────────────┬─────────────┐
/// │    Kind     │  Checksum   │  Correlation ID   │   Payload   │
/// │   2 bytes   │   2 bytes   │      4 bytes      │   N bytes   │
/// │  (LE u16)   │  (LE u16)   │     (LE u32)      │   (bytes)   │
/// └─────────────┴─────────────┴───────────────────┴─────────────┘
/// ```
///
/// All multi-byte values are in little-endian format.
///
/// # Examples
///
/// ```
/// use poslink_core::{Frame, FrameKind};
///
/// let frame = Frame::new(FrameKind::Ping, 42);
/// let encoded = frame.encode();
///
/// let decoded = Frame::decode(encoded).unwrap();
/// assert_eq!(frame.kind, decoded.kind);
/// assert_eq!(decoded.correlation_id, 42);
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame kind
    pub kind: FrameKind,

    /// Links a response to its request (0 for unsolicited frames)
    pub correlation_id: u32,

    /// Frame payload (kind-specific data)
    pub payload: Bytes,
}

impl Frame {
    /// Frame header size in bytes
    pub const HEADER_SIZE: usize = 8;

    /// Maximum payload size
    pub const MAX_PAYLOAD_SIZE: usize = crate::MAX_FRAME_SIZE - Self::HEADER_SIZE;

    /// Create a new frame with empty payload
    pub fn new(kind: FrameKind, correlation_id: u32) -> Self {
        Self {
            kind,
            correlation_id,
            payload: Bytes::new(),
        }
    }

    /// Create a frame with payload
    ///
    /// # Examples
    ///
    /// ```
    /// use poslink_core::{Frame, FrameKind};
    ///
    /// let frame = Frame::with_payload(FrameKind::SendBasket, 7, vec![b'{', b'}']);
    /// assert_eq!(frame.payload.len(), 2);
    /// ```
    pub fn with_payload(kind: FrameKind, correlation_id: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            correlation_id,
            payload: payload.into(),
        }
    }

    /// Create an unsolicited terminal frame
    pub fn unsolicited(kind: FrameKind, payload: impl Into<Bytes>) -> Self {
        Self::with_payload(kind, UNSOLICITED_CORRELATION_ID, payload)
    }

    /// Calculate checksum for this frame
    pub fn checksum(&self) -> u16 {
        checksum::calculate(self.kind.into(), self.correlation_id, &self.payload)
    }

    /// Encode frame to bytes
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.size());

        buf.put_u16_le(self.kind.into());
        buf.put_u16_le(self.checksum());
        buf.put_u32_le(self.correlation_id);
        buf.put_slice(&self.payload);

        buf
    }

    /// Encode, rejecting payloads that do not fit in a frame
    pub fn try_encode(&self) -> Result<BytesMut> {
        if self.payload.len() > Self::MAX_PAYLOAD_SIZE {
            return Err(Error::PayloadTooLarge {
                size: self.payload.len(),
                max: Self::MAX_PAYLOAD_SIZE,
            });
        }
        Ok(self.encode())
    }

    /// Decode frame from bytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Buffer is too short (< 8 bytes)
    /// - Kind code is unknown
    /// - Checksum verification fails
    pub fn decode(mut buf: BytesMut) -> Result<Self> {
        if buf.len() < Self::HEADER_SIZE {
            return Err(Error::FrameTooShort {
                expected: Self::HEADER_SIZE,
                actual: buf.len(),
            });
        }

        let kind_raw = buf.get_u16_le();
        let checksum_received = buf.get_u16_le();
        let correlation_id = buf.get_u32_le();

        let kind = FrameKind::try_from(kind_raw)?;

        let frame = Self {
            kind,
            correlation_id,
            payload: buf.freeze(),
        };

        let checksum_calculated = frame.checksum();
        if checksum_calculated != checksum_received {
            return Err(Error::ChecksumMismatch {
                expected: checksum_calculated,
                received: checksum_received,
            });
        }

        Ok(frame)
    }

    /// Check if this is a response frame
    pub fn is_response(&self) -> bool {
        self.kind.is_response()
    }

    /// Check if this is an unsolicited terminal frame
    pub fn is_unsolicited(&self) -> bool {
        self.kind.is_unsolicited()
    }

    /// Check if this is a success response
    pub fn is_success(&self) -> bool {
        self.kind.is_success()
    }

    /// Get total frame size
    pub fn size(&self) -> usize {
        Self::HEADER_SIZE + self.payload.len()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head = &self.payload[..self.payload.len().min(16)];
        f.debug_struct("Frame")
            .field("kind", &self.kind)
            .field("correlation_id", &self.correlation_id)
            .field("checksum", &format!("0x{:04X}", self.checksum()))
            .field("payload_len", &self.payload.len())
            .field("payload_head", &hex::encode(head))
            .finish()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frame[{}](corr={}, len={})",
            self.kind,
            self.correlation_id,
            self.payload.len()
        )
    }
}
