//! In-memory account store.
//!
//! Balances live in one mutex-guarded map so a transfer debits and credits
//! atomically. Account numbers are random 10-digit strings; passwords are kept
//! only as SHA-256 hex hashes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::Rng;
use serde::Deserialize;
use vaultwire_transport::{
    Credentials, Ledger, LedgerError, Operation, Sha256Auth, TransactionRequest,
    TransactionResponse,
};

use crate::error::ServerError;

/// Opening balance for seeded accounts that do not state one: 1000.00.
pub const DEFAULT_OPENING_BALANCE: u64 = 100_000;

const ACCOUNT_NUMBER_MIN: u64 = 1_000_000_000;
const ACCOUNT_NUMBER_MAX: u64 = 10_000_000_000;

/// One entry of the accounts seed file.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedAccount {
    /// Login name.
    pub username: String,
    /// Plaintext password, hashed on load.
    pub password: String,
    /// Account holder's name.
    pub full_name: String,
    /// Opening balance in cents.
    #[serde(default = "default_balance")]
    pub balance: u64,
}

fn default_balance() -> u64 {
    DEFAULT_OPENING_BALANCE
}

#[derive(Debug)]
struct Account {
    full_name: String,
    password_hash: String,
    balance: u64,
}

#[derive(Debug, Default)]
struct Accounts {
    by_number: HashMap<String, Account>,
    by_username: HashMap<String, String>,
}

/// Process-local [`Ledger`]. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    accounts: Mutex<Accounts>,
}

impl InMemoryLedger {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger populated from seed entries.
    pub fn from_seed(seed: &[SeedAccount]) -> Result<Self, ServerError> {
        let ledger = Self::new();
        for entry in seed {
            ledger.open_account(&entry.username, &entry.password, &entry.full_name, entry.balance)?;
        }
        Ok(ledger)
    }

    /// Ledger populated from a JSON seed file.
    pub fn load_seed(path: &Path) -> Result<Self, ServerError> {
        let bytes = std::fs::read(path)?;
        let seed: Vec<SeedAccount> = serde_json::from_slice(&bytes)?;
        Self::from_seed(&seed)
    }

    /// Open an account and return its number.
    ///
    /// # Errors
    ///
    /// `DuplicateUser` if the username is taken.
    pub fn open_account(
        &self,
        username: &str,
        password: &str,
        full_name: &str,
        balance: u64,
    ) -> Result<String, ServerError> {
        let mut accounts = self.lock();
        if accounts.by_username.contains_key(username) {
            return Err(ServerError::DuplicateUser(username.to_string()));
        }

        let mut rng = rand::thread_rng();
        let number = loop {
            let candidate = rng.gen_range(ACCOUNT_NUMBER_MIN..ACCOUNT_NUMBER_MAX).to_string();
            if !accounts.by_number.contains_key(&candidate) {
                break candidate;
            }
        };

        accounts.by_number.insert(
            number.clone(),
            Account {
                full_name: full_name.to_string(),
                password_hash: Sha256Auth::hash_password(password),
                balance,
            },
        );
        accounts.by_username.insert(username.to_string(), number.clone());
        Ok(number)
    }

    /// Number of accounts.
    pub fn len(&self) -> usize {
        self.lock().by_number.len()
    }

    /// Whether the ledger has no accounts.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Account number registered for `username`.
    pub fn account_number(&self, username: &str) -> Option<String> {
        self.lock().by_username.get(username).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, Accounts> {
        // Balances are written only after every check passes.
        self.accounts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Ledger for InMemoryLedger {
    fn apply(
        &self,
        account: &str,
        request: &TransactionRequest,
    ) -> Result<TransactionResponse, LedgerError> {
        let mut accounts = self.lock();
        let balance = accounts
            .by_number
            .get(account)
            .map(|a| a.balance)
            .ok_or(LedgerError::UnknownAccount)?;

        if request.amount == 0 && request.operation != Operation::Balance {
            return Err(LedgerError::InvalidAmount);
        }

        let new_balance = match &request.operation {
            Operation::Balance => balance,
            Operation::Deposit => balance
                .checked_add(request.amount)
                .ok_or(LedgerError::InvalidAmount)?,
            Operation::Withdraw => balance
                .checked_sub(request.amount)
                .ok_or(LedgerError::InsufficientFunds)?,
            Operation::Transfer { to_account } => {
                if to_account == account {
                    return Err(LedgerError::InvalidAmount);
                }
                let target = accounts
                    .by_number
                    .get(to_account)
                    .map(|a| a.balance)
                    .ok_or(LedgerError::UnknownAccount)?;
                let debited = balance
                    .checked_sub(request.amount)
                    .ok_or(LedgerError::InsufficientFunds)?;
                let credited = target
                    .checked_add(request.amount)
                    .ok_or(LedgerError::InvalidAmount)?;

                if let Some(dest) = accounts.by_number.get_mut(to_account) {
                    dest.balance = credited;
                }
                debited
            }
        };

        if let Some(source) = accounts.by_number.get_mut(account) {
            source.balance = new_balance;
        }
        Ok(TransactionResponse::ok(new_balance))
    }

    fn credentials(&self, username: &str) -> Option<Credentials> {
        let accounts = self.lock();
        let number = accounts.by_username.get(username)?;
        let account = accounts.by_number.get(number)?;
        Some(Credentials {
            account_id: number.clone(),
            full_name: account.full_name.clone(),
            password_hash: account.password_hash.clone(),
        })
    }

    fn balance(&self, account: &str) -> Option<u64> {
        self.lock().by_number.get(account).map(|a| a.balance)
    }
}
