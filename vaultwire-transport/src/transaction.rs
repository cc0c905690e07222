//! Banking messages carried inside sealed DATA frames.
//!
//! JSON encoded. Amounts are integer cents, never floats.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

/// Banking operation requested by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    /// Add funds.
    Deposit,
    /// Remove funds.
    Withdraw,
    /// Move funds to another account.
    Transfer {
        /// Destination account number.
        to_account: String,
    },
    /// Read the current balance. Amount is ignored.
    Balance,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deposit => write!(f, "deposit"),
            Self::Withdraw => write!(f, "withdraw"),
            Self::Transfer { .. } => write!(f, "transfer"),
            Self::Balance => write!(f, "balance"),
        }
    }
}

/// A single banking operation on one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    /// What to do.
    pub operation: Operation,
    /// Account the operation acts on.
    pub account_id: String,
    /// Amount in cents.
    pub amount: u64,
    /// Client clock at creation, milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl TransactionRequest {
    /// Build a request stamped with the current time.
    pub fn new(operation: Operation, account_id: impl Into<String>, amount: u64) -> Self {
        Self {
            operation,
            account_id: account_id.into(),
            amount,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Deposit `amount` cents.
    pub fn deposit(account_id: impl Into<String>, amount: u64) -> Self {
        Self::new(Operation::Deposit, account_id, amount)
    }

    /// Withdraw `amount` cents.
    pub fn withdraw(account_id: impl Into<String>, amount: u64) -> Self {
        Self::new(Operation::Withdraw, account_id, amount)
    }

    /// Transfer `amount` cents to `to_account`.
    pub fn transfer(
        account_id: impl Into<String>,
        to_account: impl Into<String>,
        amount: u64,
    ) -> Self {
        Self::new(
            Operation::Transfer {
                to_account: to_account.into(),
            },
            account_id,
            amount,
        )
    }

    /// Query the balance.
    pub fn balance(account_id: impl Into<String>) -> Self {
        Self::new(Operation::Balance, account_id, 0)
    }
}

/// Outcome of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Applied.
    Ok,
    /// Balance too low for the withdrawal or transfer.
    InsufficientFunds,
    /// Source or destination account does not exist.
    UnknownAccount,
    /// Zero amount, self-transfer or overflow.
    InvalidAmount,
    /// No successful login on this session.
    NotLoggedIn,
    /// Request names an account other than the logged-in one.
    AccountMismatch,
}

impl TransactionStatus {
    /// Whether the transaction was applied.
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Ok => "ok",
            Self::InsufficientFunds => "insufficient funds",
            Self::UnknownAccount => "unknown account",
            Self::InvalidAmount => "invalid amount",
            Self::NotLoggedIn => "not logged in",
            Self::AccountMismatch => "account mismatch",
        };
        f.write_str(text)
    }
}

/// Server's answer to a [`TransactionRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionResponse {
    /// Outcome.
    pub status: TransactionStatus,
    /// Balance of the acting account afterwards, in cents, when known.
    pub balance_after: Option<u64>,
    /// Server-assigned reference for this transaction.
    pub reference_id: Uuid,
}

impl TransactionResponse {
    /// Successful outcome.
    pub fn ok(balance_after: u64) -> Self {
        Self {
            status: TransactionStatus::Ok,
            balance_after: Some(balance_after),
            reference_id: Uuid::new_v4(),
        }
    }

    /// Rejected outcome.
    pub fn rejected(status: TransactionStatus, balance_after: Option<u64>) -> Self {
        Self {
            status,
            balance_after,
            reference_id: Uuid::new_v4(),
        }
    }
}

/// Credentials presented once per session.
#[derive(Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    /// Account holder's username.
    pub username: String,
    /// Plaintext password; zeroized on drop.
    pub password: Zeroizing<String>,
}

impl LoginRequest {
    /// Build a login request.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Zeroizing::new(password.into()),
        }
    }
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    /// Account number bound to this session.
    pub account_id: String,
    /// Account holder's name.
    pub full_name: String,
}

/// Client to server envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Authenticate the session.
    Login(LoginRequest),
    /// Apply a transaction to the logged-in account.
    Transaction(TransactionRequest),
}

/// Server to client envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Login accepted.
    LoginAccepted(LoginResponse),
    /// Login refused. No reason given.
    LoginRejected,
    /// Transaction outcome.
    Transaction(TransactionResponse),
}
