//! Key exchange.
//!
//! Sans-IO: both sides consume and produce [`Frame`]s; the caller moves them
//! over whatever transport it has.
//!
//! ```text
//! server                                   client
//!   start()  --- HANDSHAKE(pubkey DER) --->  receive()
//!                                            fresh SessionKey
//!   receive() <-- HANDSHAKE(OAEP(key)) ----  Established
//!   Established
//! ```
//!
//! Exactly one message in each direction. No renegotiation. Any error closes
//! the handshake and a new connection is required.

use std::sync::Arc;

use crate::error::HandshakeError;
use crate::frame::{Frame, MessageType, DEFAULT_MAX_PAYLOAD};
use crate::primitives::{
    KeyPair, Primitives, PublicKey, SessionKey, StandardPrimitives, SESSION_KEY_LEN,
};
use crate::session::{unkeyed_frame, unkeyed_frame_valid, SecureSession, SessionState};

/// Reject anything that is not a digest-valid HANDSHAKE frame.
fn check_handshake_frame<P: Primitives>(
    primitives: &P,
    frame: &Frame,
) -> Result<(), HandshakeError> {
    if frame.msg_type() != MessageType::Handshake {
        return Err(HandshakeError::UnexpectedFrame);
    }
    if !unkeyed_frame_valid(primitives, frame) {
        return Err(HandshakeError::KeyExchangeFailed);
    }
    Ok(())
}

/// Server side of the key exchange.
pub struct ServerHandshake<P: Primitives = StandardPrimitives> {
    state: SessionState,
    keypair: Arc<KeyPair>,
    primitives: P,
    max_payload: usize,
}

impl ServerHandshake<StandardPrimitives> {
    /// Handshake using the standard primitives.
    pub fn new(keypair: Arc<KeyPair>) -> Self {
        Self::with_primitives(keypair, StandardPrimitives)
    }
}

impl<P: Primitives + Clone> ServerHandshake<P> {
    /// Handshake using a custom primitive adapter.
    pub fn with_primitives(keypair: Arc<KeyPair>, primitives: P) -> Self {
        Self {
            state: SessionState::Unestablished,
            keypair,
            primitives,
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }

    /// Payload cap handed to the resulting session.
    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Produce the HANDSHAKE frame carrying the server's public key.
    ///
    /// # Errors
    ///
    /// `Closed` unless the handshake is fresh.
    pub fn start(&mut self) -> Result<Frame, HandshakeError> {
        if self.state != SessionState::Unestablished {
            self.state = SessionState::Closed;
            return Err(HandshakeError::Closed);
        }

        let der = self.keypair.public_key().to_der().to_vec();
        let frame = unkeyed_frame(&self.primitives, MessageType::Handshake, der)
            .map_err(|_| self.fail(HandshakeError::KeyExchangeFailed))?;

        self.state = SessionState::AwaitingClientKey;
        Ok(frame)
    }

    /// Consume the client's encrypted session key.
    ///
    /// # Errors
    ///
    /// `UnexpectedFrame` for anything but a HANDSHAKE frame or before
    /// [`start`](Self::start), `KeyExchangeFailed` if the key cannot be
    /// recovered, `Closed` once finished.
    pub fn receive(&mut self, frame: &Frame) -> Result<SecureSession<P>, HandshakeError> {
        match self.state {
            SessionState::AwaitingClientKey => {}
            SessionState::Closed | SessionState::Established => {
                self.state = SessionState::Closed;
                return Err(HandshakeError::Closed);
            }
            _ => return Err(self.fail(HandshakeError::UnexpectedFrame)),
        }

        check_handshake_frame(&self.primitives, frame).map_err(|e| self.fail(e))?;

        let key = self
            .primitives
            .asymmetric_decrypt(&self.keypair, frame.payload())
            .ok()
            .filter(|bytes| bytes.len() == SESSION_KEY_LEN)
            .and_then(|bytes| SessionKey::from_slice(&bytes).ok())
            .ok_or_else(|| self.fail(HandshakeError::KeyExchangeFailed))?;

        self.state = SessionState::Established;
        Ok(SecureSession::established(key, None, self.primitives.clone())
            .with_max_payload(self.max_payload))
    }

    fn fail(&mut self, err: HandshakeError) -> HandshakeError {
        self.state = SessionState::Closed;
        err
    }
}

/// Client side of the key exchange.
pub struct ClientHandshake<P: Primitives = StandardPrimitives> {
    state: SessionState,
    primitives: P,
    pinned: Option<String>,
    max_payload: usize,
}

impl ClientHandshake<StandardPrimitives> {
    /// Handshake using the standard primitives.
    pub fn new() -> Self {
        Self::with_primitives(StandardPrimitives)
    }
}

impl Default for ClientHandshake<StandardPrimitives> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Primitives + Clone> ClientHandshake<P> {
    /// Handshake using a custom primitive adapter.
    pub fn with_primitives(primitives: P) -> Self {
        Self {
            state: SessionState::Unestablished,
            primitives,
            pinned: None,
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }

    /// Only accept a server whose key has this fingerprint.
    ///
    /// Compared case-insensitively against [`PublicKey::fingerprint`].
    pub fn with_pinned_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.pinned = Some(fingerprint.into().to_ascii_lowercase());
        self
    }

    /// Payload cap handed to the resulting session.
    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Begin waiting for the server's key.
    ///
    /// # Errors
    ///
    /// `Closed` unless the handshake is fresh.
    pub fn start(&mut self) -> Result<(), HandshakeError> {
        if self.state != SessionState::Unestablished {
            self.state = SessionState::Closed;
            return Err(HandshakeError::Closed);
        }
        self.state = SessionState::AwaitingPeerKey;
        Ok(())
    }

    /// Consume the server's public key.
    ///
    /// Returns the HANDSHAKE frame to send back and the established session.
    ///
    /// # Errors
    ///
    /// `UnexpectedFrame` for anything but a HANDSHAKE frame or before
    /// [`start`](Self::start), `KeyExchangeFailed` for a malformed or unpinned
    /// key, `Closed` once finished.
    pub fn receive(&mut self, frame: &Frame) -> Result<(Frame, SecureSession<P>), HandshakeError> {
        match self.state {
            SessionState::AwaitingPeerKey => {}
            SessionState::Closed | SessionState::Established => {
                self.state = SessionState::Closed;
                return Err(HandshakeError::Closed);
            }
            _ => return Err(self.fail(HandshakeError::UnexpectedFrame)),
        }

        check_handshake_frame(&self.primitives, frame).map_err(|e| self.fail(e))?;

        let server_key = PublicKey::from_der(frame.payload())
            .map_err(|_| self.fail(HandshakeError::KeyExchangeFailed))?;

        let pin_ok = self
            .pinned
            .as_ref()
            .map_or(true, |pinned| *pinned == server_key.fingerprint());
        if !pin_ok {
            return Err(self.fail(HandshakeError::KeyExchangeFailed));
        }

        let key = self.primitives.generate_session_key();
        let wrapped = self
            .primitives
            .asymmetric_encrypt(&server_key, key.as_bytes())
            .map_err(|_| self.fail(HandshakeError::KeyExchangeFailed))?;
        let reply = unkeyed_frame(&self.primitives, MessageType::Handshake, wrapped)
            .map_err(|_| self.fail(HandshakeError::KeyExchangeFailed))?;

        self.state = SessionState::Established;
        let session = SecureSession::established(key, Some(server_key), self.primitives.clone())
            .with_max_payload(self.max_payload);
        Ok((reply, session))
    }

    fn fail(&mut self, err: HandshakeError) -> HandshakeError {
        self.state = SessionState::Closed;
        err
    }
}
