//! Wire framing and bounds checking.
//!
//! Wire format:
//! ```text
//! +----------+------------------+-------------------+--------------+
//! | TYPE (1B)| LENGTH (4B BE)   | PAYLOAD (LENGTH)  | TAG (32B)    |
//! +----------+------------------+-------------------+--------------+
//! ```
//!
//! This module never looks inside the payload and never computes a tag.

use crate::error::FramingError;

/// Header size: type byte plus big-endian u32 length.
pub const HEADER_LEN: usize = 5;

/// Integrity tag size (HMAC-SHA-256 / SHA-256 output).
pub const TAG_LEN: usize = 32;

/// Default maximum payload length accepted from a peer.
pub const DEFAULT_MAX_PAYLOAD: usize = 64 * 1024;

/// Fixed-size integrity tag.
pub type Tag = [u8; TAG_LEN];

/// Message type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Key exchange message.
    Handshake = 0x01,

    /// Sealed application data.
    Data = 0x02,

    /// Session close signal.
    Close = 0x03,

    /// Opaque protocol failure report.
    Error = 0x04,
}

impl MessageType {
    /// Parse message type from byte.
    /// Returns error for unknown types. No fallback. No default.
    pub fn from_byte(byte: u8) -> Result<Self, FramingError> {
        match byte {
            0x01 => Ok(Self::Handshake),
            0x02 => Ok(Self::Data),
            0x03 => Ok(Self::Close),
            0x04 => Ok(Self::Error),
            _ => Err(FramingError::UnknownType),
        }
    }

    /// Convert to byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// A wire frame.
///
/// Holding a `Frame` says nothing about its authenticity: tags are checked by
/// the handshake and the session, never here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    msg_type: MessageType,
    length: u32,
    payload: Vec<u8>,
    tag: Tag,
}

impl Frame {
    /// Assemble a frame from its parts.
    ///
    /// # Errors
    ///
    /// Returns `OversizedPayload` if the payload length does not fit the u32
    /// length field.
    pub fn new(msg_type: MessageType, payload: Vec<u8>, tag: Tag) -> Result<Self, FramingError> {
        let length = u32::try_from(payload.len()).map_err(|_| FramingError::OversizedPayload)?;
        Ok(Self {
            msg_type,
            length,
            payload,
            tag,
        })
    }

    /// Encode the header that precedes a payload of `length` bytes.
    ///
    /// Tags are computed over this header followed by the payload, so a peer
    /// cannot relabel a frame's type or length without detection.
    pub fn header(msg_type: MessageType, length: u32) -> [u8; HEADER_LEN] {
        let mut header = [0u8; HEADER_LEN];
        header[0] = msg_type.to_byte();
        header[1..].copy_from_slice(&length.to_be_bytes());
        header
    }

    /// Validate a received header.
    ///
    /// Returns the message type and the payload length. The caller allocates
    /// only after this succeeds, so a hostile length never becomes an
    /// allocation.
    ///
    /// # Errors
    ///
    /// `UnknownType` for a bad type byte, `OversizedPayload` if the length
    /// exceeds `max_payload`.
    pub fn read_header(
        header: &[u8; HEADER_LEN],
        max_payload: usize,
    ) -> Result<(MessageType, usize), FramingError> {
        let msg_type = MessageType::from_byte(header[0])?;
        let length = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;

        if length > max_payload {
            return Err(FramingError::OversizedPayload);
        }

        Ok((msg_type, length))
    }

    /// Decode one frame from the front of `bytes`.
    ///
    /// Returns the frame and the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// `Truncated` if `bytes` ends before the declared frame does, plus every
    /// error of [`Frame::read_header`].
    pub fn decode(bytes: &[u8], max_payload: usize) -> Result<(Self, usize), FramingError> {
        let header: &[u8; HEADER_LEN] = bytes
            .get(..HEADER_LEN)
            .and_then(|h| h.try_into().ok())
            .ok_or(FramingError::Truncated)?;
        let (msg_type, length) = Self::read_header(header, max_payload)?;

        let total = HEADER_LEN + length + TAG_LEN;
        let body = bytes.get(HEADER_LEN..total).ok_or(FramingError::Truncated)?;
        let (payload, tag_bytes) = body.split_at(length);

        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(tag_bytes);

        Ok((Self::new(msg_type, payload.to_vec(), tag)?, total))
    }

    /// Serialize to wire format.
    pub fn encode(&self) -> Vec<u8> {
        let mut wire = Vec::with_capacity(HEADER_LEN + self.payload.len() + TAG_LEN);
        wire.extend_from_slice(&Self::header(self.msg_type, self.length));
        wire.extend_from_slice(&self.payload);
        wire.extend_from_slice(&self.tag);
        wire
    }

    /// Get the message type.
    pub fn msg_type(&self) -> MessageType {
        self.msg_type
    }

    /// Get the declared payload length.
    pub fn length(&self) -> u32 {
        self.length
    }

    /// Get the payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the integrity tag.
    pub fn tag(&self) -> &Tag {
        &self.tag
    }
}
