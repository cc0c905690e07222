//! VaultWire Protocol Core
//!
//! Sans-IO secure transport for banking clients and servers.
//!
//! This crate provides:
//! - Primitive adapter (RSA-OAEP key transport, AES-256-CBC, HMAC-SHA-256)
//! - Wire framing with strict bounds checking
//! - Key exchange state machines for both sides
//! - Sealed sessions with sequence-bound integrity tags
//!
//! # Security Invariants
//!
//! - Any protocol violation terminates the session
//! - Any bounds violation terminates the session
//! - Any cryptographic failure terminates the session
//! - Session keys are fresh per connection and zeroized on close, error and drop
//! - Direct use of `unsafe` is forbidden (#![forbid(unsafe_code)])
//! - No retries, no recovery, no partial processing

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

pub mod error;
pub mod frame;
pub mod handshake;
pub mod primitives;
pub mod session;

pub use error::{CryptoError, FramingError, HandshakeError, SessionError};
pub use frame::{Frame, MessageType, DEFAULT_MAX_PAYLOAD};
pub use handshake::{ClientHandshake, ServerHandshake};
pub use primitives::{KeyPair, Primitives, PublicKey, SessionKey, StandardPrimitives};
pub use session::{SecureSession, SessionState};
