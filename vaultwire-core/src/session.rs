//! Secure session.
//!
//! Owns the agreed session key and the per-direction sequence counters for the
//! lifetime of one connection.
//!
//! Sealed DATA frame:
//! ```text
//! payload = E(key, plaintext || seq_be64)
//! tag     = MAC(key, TYPE || LENGTH || payload || seq_be64)
//! ```
//!
//! The receiver computes the tag with the sequence number it expects next, so a
//! replayed, reordered or dropped frame fails verification exactly like a
//! tampered one. Any error closes the session and zeroizes the key. No retries.
//! No recovery.

use zeroize::Zeroizing;

use crate::error::{FramingError, SessionError};
use crate::frame::{Frame, MessageType, DEFAULT_MAX_PAYLOAD};
use crate::primitives::{tags_equal, Primitives, PublicKey, SessionKey, StandardPrimitives};

const SEQ_LEN: usize = 8;

/// Fixed input used to compare two sessions' keys without exposing either.
const KEY_PROBE: &[u8] = b"vaultwire/v1 key comparison probe";

/// Connection lifecycle state.
///
/// Handshake drivers move through the first four; a [`SecureSession`] only
/// ever reports `Established` or `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing exchanged yet.
    Unestablished,
    /// Client waiting for the server's public key.
    AwaitingPeerKey,
    /// Server waiting for the encrypted session key.
    AwaitingClientKey,
    /// Session key agreed, sealed transport active.
    Established,
    /// Final state. Key material destroyed.
    Closed,
}

/// Build a frame tagged with the unkeyed digest.
///
/// Used for HANDSHAKE, CLOSE and ERROR frames, which exist before or without a
/// session key.
pub fn unkeyed_frame<P: Primitives>(
    primitives: &P,
    msg_type: MessageType,
    payload: Vec<u8>,
) -> Result<Frame, FramingError> {
    let length = u32::try_from(payload.len()).map_err(|_| FramingError::OversizedPayload)?;
    let mut input = Frame::header(msg_type, length).to_vec();
    input.extend_from_slice(&payload);
    let tag = primitives.digest_tag(&input);
    Frame::new(msg_type, payload, tag)
}

/// Check the unkeyed digest of a HANDSHAKE, CLOSE or ERROR frame.
pub fn unkeyed_frame_valid<P: Primitives>(primitives: &P, frame: &Frame) -> bool {
    let mut input = Frame::header(frame.msg_type(), frame.length()).to_vec();
    input.extend_from_slice(frame.payload());
    tags_equal(&primitives.digest_tag(&input), frame.tag())
}

fn data_tag_input(length: u32, ciphertext: &[u8], seq: u64) -> Vec<u8> {
    let mut input = Vec::with_capacity(5 + ciphertext.len() + SEQ_LEN);
    input.extend_from_slice(&Frame::header(MessageType::Data, length));
    input.extend_from_slice(ciphertext);
    input.extend_from_slice(&seq.to_be_bytes());
    input
}

/// An established, sealed session.
///
/// Does not implement `Clone`: exactly one connection handler owns it.
/// `seal` and `open` must be driven by a single logical flow in
/// request-then-response order.
pub struct SecureSession<P: Primitives = StandardPrimitives> {
    state: SessionState,
    key: Option<SessionKey>,
    peer_identity: Option<PublicKey>,
    primitives: P,
    send_seq: u64,
    recv_seq: u64,
    max_payload: usize,
}

impl<P: Primitives> SecureSession<P> {
    /// Wrap an agreed session key.
    ///
    /// Normally produced by the handshake. `peer_identity` is the server's
    /// public key on the client side and `None` on the server side.
    pub fn established(key: SessionKey, peer_identity: Option<PublicKey>, primitives: P) -> Self {
        Self {
            state: SessionState::Established,
            key: Some(key),
            peer_identity,
            primitives,
            send_seq: 0,
            recv_seq: 0,
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }

    /// Cap the size of sealed payloads.
    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session can still seal and open.
    pub fn is_established(&self) -> bool {
        self.state == SessionState::Established
    }

    /// Number of frames sealed so far.
    pub fn send_seq(&self) -> u64 {
        self.send_seq
    }

    /// Number of frames opened so far.
    pub fn recv_seq(&self) -> u64 {
        self.recv_seq
    }

    /// Peer's public key, if the peer authenticated one.
    pub fn peer_identity(&self) -> Option<&PublicKey> {
        self.peer_identity.as_ref()
    }

    /// Primitive adapter in use.
    pub fn primitives(&self) -> &P {
        &self.primitives
    }

    /// Seal `plaintext` into a DATA frame.
    ///
    /// Increments the send sequence on success.
    ///
    /// # Errors
    ///
    /// `SessionClosed` if the session is closed, `PayloadTooLarge` if the sealed
    /// payload would exceed the maximum, `Crypto` if a primitive fails. Every
    /// error closes the session.
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Frame, SessionError> {
        let result = self.seal_inner(plaintext);
        if result.is_err() {
            self.terminate();
        }
        result
    }

    fn seal_inner(&mut self, plaintext: &[u8]) -> Result<Frame, SessionError> {
        let key = self.key.as_ref().ok_or(SessionError::SessionClosed)?;
        let seq = self.send_seq.checked_add(1).ok_or(SessionError::SessionClosed)?;

        let mut body = Zeroizing::new(Vec::with_capacity(plaintext.len() + SEQ_LEN));
        body.extend_from_slice(plaintext);
        body.extend_from_slice(&seq.to_be_bytes());

        let ciphertext = self.primitives.symmetric_encrypt(key, &body)?;
        if ciphertext.len() > self.max_payload {
            return Err(SessionError::PayloadTooLarge);
        }
        let length = u32::try_from(ciphertext.len()).map_err(|_| SessionError::PayloadTooLarge)?;

        let tag = self
            .primitives
            .integrity_tag(key, &data_tag_input(length, &ciphertext, seq))?;
        let frame = Frame::new(MessageType::Data, ciphertext, tag)
            .map_err(|_| SessionError::PayloadTooLarge)?;

        self.send_seq = seq;
        Ok(frame)
    }

    /// Verify and decrypt a received frame.
    ///
    /// A CLOSE frame closes the session and reports `SessionClosed`.
    ///
    /// # Errors
    ///
    /// `IntegrityFailure` on any tag, decryption or sequence mismatch,
    /// `UnexpectedFrame` for HANDSHAKE or ERROR frames, `SessionClosed` once
    /// closed. Every error closes the session.
    pub fn open(&mut self, frame: &Frame) -> Result<Zeroizing<Vec<u8>>, SessionError> {
        let result = self.open_inner(frame);
        if result.is_err() {
            self.terminate();
        }
        result
    }

    fn open_inner(&mut self, frame: &Frame) -> Result<Zeroizing<Vec<u8>>, SessionError> {
        let key = self.key.as_ref().ok_or(SessionError::SessionClosed)?;

        match frame.msg_type() {
            MessageType::Data => {}
            MessageType::Close => return Err(SessionError::SessionClosed),
            MessageType::Handshake | MessageType::Error => {
                return Err(SessionError::UnexpectedFrame)
            }
        }

        let expected = self.recv_seq.checked_add(1).ok_or(SessionError::SessionClosed)?;
        let tag_input = data_tag_input(frame.length(), frame.payload(), expected);
        if !self.primitives.verify_tag(key, &tag_input, frame.tag()) {
            return Err(SessionError::IntegrityFailure);
        }

        let mut body = self
            .primitives
            .symmetric_decrypt(key, frame.payload())
            .map_err(|_| SessionError::IntegrityFailure)?;

        let split = body
            .len()
            .checked_sub(SEQ_LEN)
            .ok_or(SessionError::IntegrityFailure)?;
        let mut seq_bytes = [0u8; SEQ_LEN];
        seq_bytes.copy_from_slice(&body[split..]);
        if u64::from_be_bytes(seq_bytes) != expected {
            return Err(SessionError::IntegrityFailure);
        }
        body.truncate(split);

        self.recv_seq = expected;
        Ok(body)
    }

    /// Produce the CLOSE frame to send and close the session.
    ///
    /// # Errors
    ///
    /// `SessionClosed` if already closed.
    pub fn close(&mut self) -> Result<Frame, SessionError> {
        if self.state == SessionState::Closed {
            return Err(SessionError::SessionClosed);
        }
        let frame = unkeyed_frame(&self.primitives, MessageType::Close, Vec::new())
            .map_err(|_| SessionError::SessionClosed);
        self.terminate();
        frame
    }

    /// Close immediately and zeroize the key.
    ///
    /// Idempotent.
    pub fn terminate(&mut self) {
        // Dropping the key runs ZeroizeOnDrop.
        self.key = None;
        self.state = SessionState::Closed;
    }

    /// Whether `other` holds the same session key.
    ///
    /// Compares tags over a fixed probe in constant time; the keys themselves
    /// are never exposed. Closed sessions share nothing.
    pub fn shares_key_with(&self, other: &Self) -> bool {
        let (Some(mine), Some(theirs)) = (self.key.as_ref(), other.key.as_ref()) else {
            return false;
        };
        match (
            self.primitives.integrity_tag(mine, KEY_PROBE),
            other.primitives.integrity_tag(theirs, KEY_PROBE),
        ) {
            (Ok(a), Ok(b)) => tags_equal(&a, &b),
            _ => false,
        }
    }
}

impl<P: Primitives> std::fmt::Debug for SecureSession<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureSession")
            .field("state", &self.state)
            .field("peer_identity", &self.peer_identity)
            .field("send_seq", &self.send_seq)
            .field("recv_seq", &self.recv_seq)
            .finish_non_exhaustive()
    }
}

impl<P: Primitives> Drop for SecureSession<P> {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{DEFAULT_MAX_PAYLOAD, TAG_LEN};
    use crate::primitives::SESSION_KEY_LEN;

    fn pair() -> (SecureSession, SecureSession) {
        let bytes = [0x24u8; SESSION_KEY_LEN];
        (
            SecureSession::established(SessionKey::from_bytes(bytes), None, StandardPrimitives),
            SecureSession::established(SessionKey::from_bytes(bytes), None, StandardPrimitives),
        )
    }

    #[test]
    fn test_deposit_scenario() {
        let (mut client, mut server) = pair();

        let request = client.seal(b"DEPOSIT 100 acct=42").unwrap();
        assert_eq!(request.msg_type(), MessageType::Data);
        assert_eq!(server.open(&request).unwrap().as_slice(), b"DEPOSIT 100 acct=42");

        let response = server.seal(b"OK balance=600").unwrap();
        assert_eq!(client.open(&response).unwrap().as_slice(), b"OK balance=600");
    }

    #[test]
    fn test_sequence_counters() {
        let (mut client, mut server) = pair();
        for i in 1..=5u64 {
            let frame = client.seal(b"ping").unwrap();
            assert_eq!(client.send_seq(), i);
            server.open(&frame).unwrap();
            assert_eq!(server.recv_seq(), i);
        }
        assert_eq!(client.recv_seq(), 0);
        assert_eq!(server.send_seq(), 0);
    }

    #[test]
    fn test_replay_rejected_and_closes() {
        let (mut client, mut server) = pair();
        let frame = client.seal(b"WITHDRAW 50").unwrap();
        server.open(&frame).unwrap();

        assert_eq!(server.open(&frame), Err(SessionError::IntegrityFailure));
        assert_eq!(server.state(), SessionState::Closed);
        assert_eq!(server.open(&frame), Err(SessionError::SessionClosed));
    }

    #[test]
    fn test_reorder_rejected() {
        let (mut client, mut server) = pair();
        let first = client.seal(b"one").unwrap();
        let second = client.seal(b"two").unwrap();
        drop(first);
        assert_eq!(server.open(&second), Err(SessionError::IntegrityFailure));
    }

    #[test]
    fn test_relabelled_frame_rejected() {
        let (mut client, mut server) = pair();
        let frame = client.seal(b"payload").unwrap();
        let truncated = frame.payload()[..16].to_vec();
        let forged = Frame::new(MessageType::Data, truncated, *frame.tag()).unwrap();
        assert_eq!(server.open(&forged), Err(SessionError::IntegrityFailure));
    }

    #[test]
    fn test_close_frame_closes() {
        let (mut client, mut server) = pair();
        let close = client.close().unwrap();
        assert_eq!(close.msg_type(), MessageType::Close);
        assert!(unkeyed_frame_valid(&StandardPrimitives, &close));
        assert_eq!(client.state(), SessionState::Closed);
        assert_eq!(client.close(), Err(SessionError::SessionClosed));

        assert_eq!(server.open(&close), Err(SessionError::SessionClosed));
        assert_eq!(server.state(), SessionState::Closed);
    }

    #[test]
    fn test_seal_after_close_fails() {
        let (mut client, _server) = pair();
        client.terminate();
        assert_eq!(client.seal(b"late"), Err(SessionError::SessionClosed));
    }

    #[test]
    fn test_handshake_frame_after_established_fails() {
        let (_client, mut server) = pair();
        let frame =
            unkeyed_frame(&StandardPrimitives, MessageType::Handshake, vec![1, 2, 3]).unwrap();
        assert_eq!(server.open(&frame), Err(SessionError::UnexpectedFrame));
        assert_eq!(server.state(), SessionState::Closed);
    }

    #[test]
    fn test_payload_limit() {
        let (client, _server) = pair();
        let mut client = client.with_max_payload(64);
        assert_eq!(client.seal(&[0u8; 128]), Err(SessionError::PayloadTooLarge));
        assert_eq!(client.state(), SessionState::Closed);
    }

    #[test]
    fn test_shares_key_with() {
        let (a, b) = pair();
        let c = SecureSession::established(SessionKey::generate(), None, StandardPrimitives);
        assert!(a.shares_key_with(&b));
        assert!(!a.shares_key_with(&c));

        let mut b = b;
        b.terminate();
        assert!(!a.shares_key_with(&b));
    }

    #[test]
    fn test_unkeyed_frame_detects_corruption() {
        let frame = unkeyed_frame(&StandardPrimitives, MessageType::Error, vec![0x01]).unwrap();
        assert!(unkeyed_frame_valid(&StandardPrimitives, &frame));

        let mut wire = frame.encode();
        let last = wire.len() - TAG_LEN - 1;
        wire[last] ^= 0x80;
        let (corrupted, _) = Frame::decode(&wire, DEFAULT_MAX_PAYLOAD).unwrap();
        assert!(!unkeyed_frame_valid(&StandardPrimitives, &corrupted));
    }
}
