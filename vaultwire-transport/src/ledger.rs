//! Collaborators consulted by the server after a message has been opened.
//!
//! The transport never stores balances or passwords itself; it hands verified
//! requests to a [`Ledger`] and credential checks to an [`Auth`].

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::transaction::{TransactionRequest, TransactionResponse, TransactionStatus};

/// Reasons a ledger refuses a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Balance too low.
    #[error("insufficient funds")]
    InsufficientFunds,
    /// Account does not exist.
    #[error("unknown account")]
    UnknownAccount,
    /// Amount is zero, overflows, or the transfer targets its own source.
    #[error("invalid amount")]
    InvalidAmount,
}

impl From<LedgerError> for TransactionStatus {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientFunds => Self::InsufficientFunds,
            LedgerError::UnknownAccount => Self::UnknownAccount,
            LedgerError::InvalidAmount => Self::InvalidAmount,
        }
    }
}

/// Stored login material for one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Account number.
    pub account_id: String,
    /// Account holder's name.
    pub full_name: String,
    /// Stored password hash, as understood by the [`Auth`] in use.
    pub password_hash: String,
}

/// Account store.
///
/// Shared by every connection; implementations synchronize internally.
pub trait Ledger: Send + Sync {
    /// Apply `request` to `account`.
    ///
    /// `account` is the logged-in account; the channel has already checked it
    /// matches `request.account_id`.
    fn apply(
        &self,
        account: &str,
        request: &TransactionRequest,
    ) -> Result<TransactionResponse, LedgerError>;

    /// Login material for `username`, if the user exists.
    fn credentials(&self, username: &str) -> Option<Credentials>;

    /// Current balance of `account`, in cents.
    fn balance(&self, account: &str) -> Option<u64>;
}

/// Password verification.
pub trait Auth: Send + Sync {
    /// Whether `attempt` matches the stored `hash`.
    fn verify_password(&self, hash: &str, attempt: &str) -> bool;
}

/// Unsalted SHA-256 hex password hashes.
///
/// Matches the account store format this server inherits. Comparison is
/// constant time.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Auth;

impl Sha256Auth {
    /// Hash a password into the stored format.
    pub fn hash_password(password: &str) -> String {
        hex::encode(Sha256::digest(password.as_bytes()))
    }
}

impl Auth for Sha256Auth {
    fn verify_password(&self, hash: &str, attempt: &str) -> bool {
        let computed = Self::hash_password(attempt);
        let stored = hash.to_ascii_lowercase();
        stored.len() == computed.len() && bool::from(stored.as_bytes().ct_eq(computed.as_bytes()))
    }
}
