//! Server setup errors.
//!
//! Per-connection failures are `TransportError`s and never reach here; these
//! only stop the server from starting.

use std::path::PathBuf;

use thiserror::Error;
use vaultwire_core::CryptoError;

/// Errors raised while preparing the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Filesystem or socket failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Identity key could not be generated, parsed or exported.
    #[error("identity key error: {0}")]
    Key(#[from] CryptoError),

    /// Key file exists but does not hold a usable key.
    #[error("unusable key file {}", .0.display())]
    KeyFile(PathBuf),

    /// Accounts seed file is not valid JSON of the expected shape.
    #[error("invalid accounts file: {0}")]
    Seed(#[from] serde_json::Error),

    /// Two accounts share a username.
    #[error("duplicate username: {0}")]
    DuplicateUser(String),
}
