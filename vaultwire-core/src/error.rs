//! Protocol errors.
//!
//! Every error is terminal for the connection attempt or session it occurs in.
//! Nothing in this crate retries. Display strings are deliberately terse so no
//! cryptographic detail reaches a log line or a user.

use thiserror::Error;

/// Misuse of a primitive or malformed cryptographic input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Plaintext exceeds what the asymmetric key can encrypt in one block.
    #[error("input exceeds key capacity")]
    InputTooLarge,

    /// Encryption failed.
    #[error("encryption failed")]
    Encryption,

    /// Decryption failed (bad padding, bad length, wrong key).
    #[error("decryption failed")]
    Decryption,

    /// Key material could not be parsed or used.
    #[error("invalid key")]
    InvalidKey,

    /// Key generation failed.
    #[error("key generation failed")]
    KeyGeneration,
}

/// Wire-level malformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FramingError {
    /// Input ended before the declared frame was complete.
    #[error("truncated frame")]
    Truncated,

    /// Declared payload length exceeds the configured maximum.
    #[error("oversized payload")]
    OversizedPayload,

    /// Type byte is not a known message type.
    #[error("unknown frame type")]
    UnknownType,
}

/// Handshake protocol violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandshakeError {
    /// The session key could not be agreed (malformed key, wrong key, bad digest).
    #[error("key exchange failed")]
    KeyExchangeFailed,

    /// A frame arrived that is not allowed in the current handshake state.
    #[error("unexpected frame")]
    UnexpectedFrame,

    /// The handshake already failed or completed.
    #[error("handshake closed")]
    Closed,
}

/// Post-handshake protocol violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Tag mismatch: tampering, replay or reordering.
    #[error("integrity failure")]
    IntegrityFailure,

    /// Session is closed. A new handshake is required.
    #[error("session closed")]
    SessionClosed,

    /// Frame type is not valid on an established session.
    #[error("unexpected frame")]
    UnexpectedFrame,

    /// Sealed payload would exceed the configured maximum.
    #[error("payload too large")]
    PayloadTooLarge,

    /// A primitive failed while sealing.
    #[error("crypto failure")]
    Crypto(#[from] CryptoError),
}
