//! Transport errors.

use thiserror::Error;
use vaultwire_core::{FramingError, HandshakeError, SessionError};

/// What a user is told about any connection-level failure.
pub const USER_FAILURE_MESSAGE: &str = "connection failed, please retry";

/// Opaque codes carried in ERROR frames.
///
/// A single byte, never more detail than the failing layer.
pub mod code {
    /// Malformed frame.
    pub const FRAMING: u8 = 0x01;
    /// Key exchange failure.
    pub const HANDSHAKE: u8 = 0x02;
    /// Integrity or sequencing failure on an established session.
    pub const SESSION: u8 = 0x03;
    /// Payload did not decode.
    pub const MALFORMED: u8 = 0x04;
    /// Peer was too slow.
    pub const TIMEOUT: u8 = 0x05;
    /// Anything else.
    pub const INTERNAL: u8 = 0xFF;
}

/// Errors that can occur during transport operations.
///
/// Every variant ends the connection. Display strings are deliberately terse.
/// Do not leak details.
#[derive(Debug, Error)]
pub enum TransportError {
    // --- Protocol (terminal) ---
    /// Wire-level malformation.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// Key exchange failed.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// Sealed session failure.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Peer sent an ERROR frame.
    #[error("peer reported failure (code 0x{0:02x})")]
    PeerError(u8),

    /// CLOSE or ERROR frame whose payload has the wrong shape.
    #[error("malformed control frame")]
    MalformedFrame,

    /// Peer sent a well-formed message that makes no sense here.
    #[error("unexpected response")]
    UnexpectedResponse,

    /// Decrypted payload was not a valid message.
    #[error("malformed message")]
    Codec(#[from] serde_json::Error),

    // --- Application ---
    /// Server refused the credentials.
    #[error("login rejected")]
    LoginRejected,

    // --- Lifecycle ---
    /// Operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// Peer closed the connection.
    #[error("peer disconnected")]
    Disconnected,

    /// Socket error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// The only text a user-facing surface should print for this error.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::LoginRejected => "invalid username or password",
            _ => USER_FAILURE_MESSAGE,
        }
    }

    /// ERROR frame code reported to the peer for this failure.
    pub fn wire_code(&self) -> u8 {
        match self {
            Self::Framing(_) => code::FRAMING,
            Self::Handshake(_) => code::HANDSHAKE,
            Self::Session(_) => code::SESSION,
            Self::Codec(_) | Self::UnexpectedResponse | Self::MalformedFrame => {
                code::MALFORMED
            }
            Self::Timeout => code::TIMEOUT,
            _ => code::INTERNAL,
        }
    }
}

impl From<tokio::time::error::Elapsed> for TransportError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}
