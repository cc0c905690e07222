//! Primitive adapter.
//!
//! Wraps the asymmetric, symmetric and integrity-tag operations behind
//! fixed-size, fixed-semantics functions. No protocol logic lives here.
//!
//! The production suite ([`StandardPrimitives`]):
//!
//! - Asymmetric: RSA with OAEP(SHA-256) padding
//! - Symmetric: AES-256-CBC with PKCS#7 padding, random 16-byte IV prepended
//! - Integrity: HMAC-SHA-256, compared in constant time
//!
//! The session key is never used directly by a cipher: encryption and MAC
//! subkeys are derived from it with HKDF-SHA-256 under distinct labels.

use std::fmt;

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs1::{
    DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey, LineEnding,
};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;
use crate::frame::{Tag, TAG_LEN};

/// Session key length in bytes.
pub const SESSION_KEY_LEN: usize = 32;

/// AES block and IV size.
pub const IV_LEN: usize = 16;

/// Default RSA modulus size for a server identity.
pub const DEFAULT_KEY_BITS: usize = 2048;

/// Smallest RSA modulus accepted for generation.
pub const MIN_KEY_BITS: usize = 1024;

/// OAEP(SHA-256) overhead: two digests plus two bytes.
const OAEP_OVERHEAD: usize = 2 * 32 + 2;

const ENC_LABEL: &[u8] = b"vaultwire/v1 enc";
const MAC_LABEL: &[u8] = b"vaultwire/v1 mac";

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// Symmetric session key.
///
/// Fresh per connection. Never persisted, never logged. Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_LEN]);

impl SessionKey {
    /// Generate a new random key from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut key = [0u8; SESSION_KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    /// Wrap existing key bytes.
    pub fn from_bytes(bytes: [u8; SESSION_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a key recovered from the key exchange.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` unless `bytes` is exactly [`SESSION_KEY_LEN`] long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let mut key = [0u8; SESSION_KEY_LEN];
        if bytes.len() != SESSION_KEY_LEN {
            return Err(CryptoError::InvalidKey);
        }
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    /// Raw key bytes, for [`Primitives`] implementations only.
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// RSA public key with its fixed wire encoding (PKCS#1 DER).
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    inner: RsaPublicKey,
    der: Vec<u8>,
}

impl PublicKey {
    fn from_rsa(inner: RsaPublicKey) -> Result<Self, CryptoError> {
        let der = inner
            .to_pkcs1_der()
            .map_err(|_| CryptoError::InvalidKey)?
            .as_bytes()
            .to_vec();
        Ok(Self { inner, der })
    }

    /// Parse a public key from its wire encoding.
    pub fn from_der(der: &[u8]) -> Result<Self, CryptoError> {
        let inner = RsaPublicKey::from_pkcs1_der(der).map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self {
            inner,
            der: der.to_vec(),
        })
    }

    /// Wire encoding (PKCS#1 DER).
    pub fn to_der(&self) -> &[u8] {
        &self.der
    }

    /// Largest plaintext this key can encrypt in one OAEP block.
    pub fn capacity(&self) -> usize {
        self.inner.size().saturating_sub(OAEP_OVERHEAD)
    }

    /// Short fingerprint for out-of-band verification.
    ///
    /// First 8 bytes of SHA-256 over the DER encoding, as 16 hex characters.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.der);
        hex::encode(&digest[..8])
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PublicKey").field(&self.fingerprint()).finish()
    }
}

/// Server identity keypair.
///
/// The private half never leaves this struct; `RsaPrivateKey` zeroizes its
/// own limbs on drop.
pub struct KeyPair {
    private: RsaPrivateKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a new keypair with a modulus of `bits` bits.
    ///
    /// # Errors
    ///
    /// `KeyGeneration` if `bits` is below [`MIN_KEY_BITS`] or generation fails.
    pub fn generate(bits: usize) -> Result<Self, CryptoError> {
        if bits < MIN_KEY_BITS {
            return Err(CryptoError::KeyGeneration);
        }
        let private = RsaPrivateKey::new(&mut OsRng, bits).map_err(|_| CryptoError::KeyGeneration)?;
        Self::from_private(private)
    }

    fn from_private(private: RsaPrivateKey) -> Result<Self, CryptoError> {
        let public = PublicKey::from_rsa(RsaPublicKey::from(&private))?;
        Ok(Self { private, public })
    }

    /// Load a keypair from a PKCS#1 PEM private key.
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let private = RsaPrivateKey::from_pkcs1_pem(pem).map_err(|_| CryptoError::InvalidKey)?;
        Self::from_private(private)
    }

    /// Export the private key as PKCS#1 PEM.
    pub fn to_pem(&self) -> Result<Zeroizing<String>, CryptoError> {
        self.private
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|_| CryptoError::InvalidKey)
    }

    /// Public half.
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// Compare two tags in constant time.
pub fn tags_equal(expected: &[u8], actual: &[u8]) -> bool {
    expected.len() == actual.len() && bool::from(expected.ct_eq(actual))
}

/// Cryptographic operations used by the handshake and the session.
///
/// Implementations must be pure with respect to their inputs, apart from
/// drawing randomness. Swapping the implementation lets the protocol layers
/// be tested against deterministic stand-ins.
pub trait Primitives {
    /// Encrypt `plaintext` under `public_key`.
    ///
    /// Fails with `InputTooLarge` if the plaintext exceeds the key capacity.
    fn asymmetric_encrypt(
        &self,
        public_key: &PublicKey,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Decrypt `ciphertext` with the private half of `keypair`.
    ///
    /// Fails with `Decryption` on invalid padding or the wrong key.
    fn asymmetric_decrypt(
        &self,
        keypair: &KeyPair,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError>;

    /// Encrypt `plaintext` under the session key.
    fn symmetric_encrypt(&self, key: &SessionKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Decrypt `ciphertext` under the session key.
    ///
    /// Fails with `Decryption` on malformed length or padding.
    fn symmetric_decrypt(
        &self,
        key: &SessionKey,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError>;

    /// Keyed integrity tag over `data`.
    fn integrity_tag(&self, key: &SessionKey, data: &[u8]) -> Result<Tag, CryptoError>;

    /// Unkeyed digest tag, for frames sent before or without a session key.
    fn digest_tag(&self, data: &[u8]) -> Tag {
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&Sha256::digest(data));
        tag
    }

    /// Verify a keyed tag in constant time.
    fn verify_tag(&self, key: &SessionKey, data: &[u8], tag: &[u8]) -> bool {
        match self.integrity_tag(key, data) {
            Ok(expected) => tags_equal(&expected, tag),
            Err(_) => false,
        }
    }

    /// Draw a fresh session key.
    fn generate_session_key(&self) -> SessionKey {
        SessionKey::generate()
    }
}

/// RSA-OAEP / AES-256-CBC / HMAC-SHA-256.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardPrimitives;

impl StandardPrimitives {
    fn subkey(key: &SessionKey, label: &[u8]) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
        let hk = Hkdf::<Sha256>::new(None, key.as_bytes());
        let mut okm = Zeroizing::new([0u8; 32]);
        hk.expand(label, &mut okm[..])
            .map_err(|_| CryptoError::InvalidKey)?;
        Ok(okm)
    }
}

impl Primitives for StandardPrimitives {
    fn asymmetric_encrypt(
        &self,
        public_key: &PublicKey,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if plaintext.len() > public_key.capacity() {
            return Err(CryptoError::InputTooLarge);
        }
        public_key
            .inner
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext)
            .map_err(|_| CryptoError::Encryption)
    }

    fn asymmetric_decrypt(
        &self,
        keypair: &KeyPair,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        keypair
            .private
            .decrypt(Oaep::new::<Sha256>(), ciphertext)
            .map(Zeroizing::new)
            .map_err(|_| CryptoError::Decryption)
    }

    fn symmetric_encrypt(
        &self,
        key: &SessionKey,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let enc_key = Self::subkey(key, ENC_LABEL)?;
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let cipher = Aes256CbcEnc::new_from_slices(&enc_key[..], &iv)
            .map_err(|_| CryptoError::Encryption)?;
        let body = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let mut out = Vec::with_capacity(IV_LEN + body.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&body);
        Ok(out)
    }

    fn symmetric_decrypt(
        &self,
        key: &SessionKey,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        // IV plus at least one block, whole blocks only
        if ciphertext.len() < 2 * IV_LEN || ciphertext.len() % IV_LEN != 0 {
            return Err(CryptoError::Decryption);
        }
        let (iv, body) = ciphertext.split_at(IV_LEN);

        let enc_key = Self::subkey(key, ENC_LABEL)?;
        let cipher = Aes256CbcDec::new_from_slices(&enc_key[..], iv)
            .map_err(|_| CryptoError::Decryption)?;
        cipher
            .decrypt_padded_vec_mut::<Pkcs7>(body)
            .map(Zeroizing::new)
            .map_err(|_| CryptoError::Decryption)
    }

    fn integrity_tag(&self, key: &SessionKey, data: &[u8]) -> Result<Tag, CryptoError> {
        let mac_key = Self::subkey(key, MAC_LABEL)?;
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&mac_key[..])
            .map_err(|_| CryptoError::InvalidKey)?;
        mac.update(data);

        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&mac.finalize().into_bytes());
        Ok(tag)
    }
}

#[cfg(test)]
pub(crate) mod test_keys {
    use std::sync::{Arc, OnceLock};

    use super::KeyPair;

    // Small moduli keep debug-mode test runs fast; both still fit a 32-byte
    // session key under OAEP(SHA-256).
    pub(crate) fn shared_server() -> Arc<KeyPair> {
        static KEY: OnceLock<Arc<KeyPair>> = OnceLock::new();
        KEY.get_or_init(|| Arc::new(KeyPair::generate(1024).unwrap())).clone()
    }

    pub(crate) fn shared_other() -> Arc<KeyPair> {
        static KEY: OnceLock<Arc<KeyPair>> = OnceLock::new();
        KEY.get_or_init(|| Arc::new(KeyPair::generate(1024).unwrap())).clone()
    }

    pub(crate) fn server() -> &'static KeyPair {
        static KEY: OnceLock<Arc<KeyPair>> = OnceLock::new();
        KEY.get_or_init(shared_server)
    }

    pub(crate) fn other() -> &'static KeyPair {
        static KEY: OnceLock<Arc<KeyPair>> = OnceLock::new();
        KEY.get_or_init(shared_other)
    }
}
