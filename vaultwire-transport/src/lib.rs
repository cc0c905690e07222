//! VaultWire Transport
//!
//! Async socket transport for VaultWire banking clients and servers.
//!
//! This crate wraps `vaultwire-core` and provides framed stream I/O, the
//! key exchange driver and the transaction channel that carries banking
//! requests over a sealed session.
//!
//! # Security Invariants & Hard Failures
//!
//! Any error (protocol violation, integrity failure, malformed message or
//! transport loss) results in **immediate session termination**.
//!
//! - **One Strike**: any error in `login()`, `submit()` or `serve()` other
//!   than a login rejection kills the channel.
//! - **Bounded Reads**: frame headers are validated before a body buffer is
//!   allocated; every read, write and handshake runs under a timeout.
//! - **No Duplication**: `TransactionChannel` and `SecureSession` do not
//!   implement `Clone`.
//! - **Opaque Failures**: peers learn a one-byte code, users learn
//!   "connection failed, please retry".

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

pub mod channel;
pub mod config;
pub mod error;
pub mod handshake;
pub mod ledger;
pub mod transaction;
pub mod wire;

pub use channel::TransactionChannel;
pub use config::TransportConfig;
pub use error::{TransportError, USER_FAILURE_MESSAGE};
pub use handshake::HandshakeProtocol;
pub use ledger::{Auth, Credentials, Ledger, LedgerError, Sha256Auth};
pub use transaction::{
    LoginRequest, LoginResponse, Operation, Request, Response, TransactionRequest,
    TransactionResponse, TransactionStatus,
};
pub use wire::{read_frame, FramedStream};
