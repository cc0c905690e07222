//! Property tests for sealed sessions.
//!
//! Run against both the standard primitives and a deterministic fake, so a
//! failure can be told apart as a protocol bug or a primitive bug.

use std::sync::{Arc, OnceLock};

use proptest::prelude::*;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use vaultwire_core::frame::{HEADER_LEN, TAG_LEN};
use vaultwire_core::primitives::SESSION_KEY_LEN;
use vaultwire_core::{
    ClientHandshake, CryptoError, Frame, KeyPair, Primitives, PublicKey, SecureSession,
    ServerHandshake, SessionError, SessionKey, StandardPrimitives, DEFAULT_MAX_PAYLOAD,
};

/// XOR "cipher" and SHA-256(key || data) tags. Deterministic, no IV.
#[derive(Debug, Clone, Copy, Default)]
struct FakePrimitives;

impl FakePrimitives {
    fn xor(key: &SessionKey, data: &[u8]) -> Vec<u8> {
        data.iter()
            .zip(key.as_bytes().iter().cycle())
            .map(|(d, k)| d ^ k)
            .collect()
    }
}

impl Primitives for FakePrimitives {
    fn asymmetric_encrypt(
        &self,
        public_key: &PublicKey,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        StandardPrimitives.asymmetric_encrypt(public_key, plaintext)
    }

    fn asymmetric_decrypt(
        &self,
        keypair: &KeyPair,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        StandardPrimitives.asymmetric_decrypt(keypair, ciphertext)
    }

    fn symmetric_encrypt(
        &self,
        key: &SessionKey,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        Ok(Self::xor(key, plaintext))
    }

    fn symmetric_decrypt(
        &self,
        key: &SessionKey,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        Ok(Zeroizing::new(Self::xor(key, ciphertext)))
    }

    fn integrity_tag(&self, key: &SessionKey, data: &[u8]) -> Result<[u8; TAG_LEN], CryptoError> {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hasher.update(data);
        Ok(hasher.finalize().into())
    }
}

fn server_key() -> Arc<KeyPair> {
    static KEY: OnceLock<Arc<KeyPair>> = OnceLock::new();
    KEY.get_or_init(|| Arc::new(KeyPair::generate(1024).expect("keygen failed")))
        .clone()
}

fn pair<P: Primitives + Copy>(primitives: P, seed: u8) -> (SecureSession<P>, SecureSession<P>) {
    let bytes = [seed; SESSION_KEY_LEN];
    (
        SecureSession::established(SessionKey::from_bytes(bytes), None, primitives),
        SecureSession::established(SessionKey::from_bytes(bytes), None, primitives),
    )
}

fn flip_bit(frame: &Frame, bit: usize) -> Frame {
    let mut wire = frame.encode();
    let body_bits = (wire.len() - HEADER_LEN) * 8;
    let bit = bit % body_bits;
    wire[HEADER_LEN + bit / 8] ^= 1 << (bit % 8);
    let (flipped, _) = Frame::decode(&wire, DEFAULT_MAX_PAYLOAD).expect("lengths unchanged");
    flipped
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn roundtrip_standard(
        plaintext in proptest::collection::vec(any::<u8>(), 0..2048),
        seed in any::<u8>(),
    ) {
        let (mut client, mut server) = pair(StandardPrimitives, seed);
        let frame = client.seal(&plaintext).unwrap();
        let opened = server.open(&frame).unwrap();
        prop_assert_eq!(opened.as_slice(), plaintext.as_slice());
    }

    #[test]
    fn roundtrip_fake(
        plaintext in proptest::collection::vec(any::<u8>(), 0..2048),
        seed in any::<u8>(),
    ) {
        let (mut client, mut server) = pair(FakePrimitives, seed);
        let frame = client.seal(&plaintext).unwrap();
        let opened = server.open(&frame).unwrap();
        prop_assert_eq!(opened.as_slice(), plaintext.as_slice());
    }

    #[test]
    fn any_bit_flip_is_integrity_failure(
        plaintext in proptest::collection::vec(any::<u8>(), 1..256),
        bit in any::<usize>(),
    ) {
        let (mut client, mut server) = pair(StandardPrimitives, 0x5A);
        let frame = client.seal(&plaintext).unwrap();
        let tampered = flip_bit(&frame, bit);

        prop_assert_eq!(server.open(&tampered), Err(SessionError::IntegrityFailure));
        prop_assert_eq!(server.open(&frame), Err(SessionError::SessionClosed));
    }

    #[test]
    fn any_bit_flip_is_integrity_failure_fake(
        plaintext in proptest::collection::vec(any::<u8>(), 1..256),
        bit in any::<usize>(),
    ) {
        let (mut client, mut server) = pair(FakePrimitives, 0x5A);
        let frame = client.seal(&plaintext).unwrap();
        prop_assert_eq!(server.open(&flip_bit(&frame, bit)), Err(SessionError::IntegrityFailure));
    }

    #[test]
    fn replay_is_rejected(
        plaintext in proptest::collection::vec(any::<u8>(), 0..256),
        before in 0usize..5,
    ) {
        let (mut client, mut server) = pair(FakePrimitives, 0x11);
        for _ in 0..before {
            let frame = client.seal(b"filler").unwrap();
            server.open(&frame).unwrap();
        }
        let frame = client.seal(&plaintext).unwrap();
        server.open(&frame).unwrap();
        prop_assert_eq!(server.open(&frame), Err(SessionError::IntegrityFailure));
    }

    #[test]
    fn sequence_numbers_are_monotonic(n in 0u64..32) {
        let (mut client, mut server) = pair(FakePrimitives, 0x77);
        for _ in 0..n {
            let frame = client.seal(b"tick").unwrap();
            server.open(&frame).unwrap();
        }
        prop_assert_eq!(client.send_seq(), n);
        prop_assert_eq!(server.recv_seq(), n);
    }
}

#[test]
fn handshake_with_fake_primitives() {
    let mut server = ServerHandshake::with_primitives(server_key(), FakePrimitives);
    let mut client = ClientHandshake::with_primitives(FakePrimitives);

    let hello = server.start().expect("server start failed");
    client.start().expect("client start failed");
    let (reply, mut client_session) = client.receive(&hello).expect("client receive failed");
    let mut server_session = server.receive(&reply).expect("server receive failed");

    assert!(client_session.shares_key_with(&server_session));

    let request = client_session.seal(b"DEPOSIT 100 acct=42").expect("seal failed");
    let opened = server_session.open(&request).expect("open failed");
    assert_eq!(opened.as_slice(), b"DEPOSIT 100 acct=42");

    let response = server_session.seal(b"OK balance=600").expect("seal failed");
    let opened = client_session.open(&response).expect("open failed");
    assert_eq!(opened.as_slice(), b"OK balance=600");
}

#[test]
fn sessions_from_separate_handshakes_do_not_interoperate() {
    let run = || {
        let mut server = ServerHandshake::new(server_key());
        let mut client = ClientHandshake::new();
        let hello = server.start().expect("server start failed");
        client.start().expect("client start failed");
        let (reply, client_session) = client.receive(&hello).expect("client receive failed");
        let server_session = server.receive(&reply).expect("server receive failed");
        (client_session, server_session)
    };

    let (mut first_client, _first_server) = run();
    let (_second_client, mut second_server) = run();

    let frame = first_client.seal(b"BALANCE").expect("seal failed");
    assert_eq!(second_server.open(&frame), Err(SessionError::IntegrityFailure));
}
