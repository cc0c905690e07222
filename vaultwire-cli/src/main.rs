//! VaultWire command-line banking client.
//!
//! One operation per invocation: connect, handshake, log in, submit, close.

use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use vaultwire_transport::{
    TransactionChannel, TransactionRequest, TransactionResponse, TransportConfig, TransportError,
};
use zeroize::Zeroizing;

const DEFAULT_SERVER: &str = "127.0.0.1:9443";

/// VaultWire banking client
#[derive(Parser, Debug)]
#[command(name = "vaultwire")]
#[command(about = "Secure banking client")]
#[command(version)]
struct Cli {
    /// Server address
    #[arg(short, long, default_value = DEFAULT_SERVER)]
    server: String,

    /// Username
    #[arg(short, long)]
    user: String,

    /// Password
    #[arg(short, long, env = "VAULTWIRE_PASSWORD", hide_env_values = true)]
    password: String,

    /// Expected server fingerprint (16 hex characters)
    #[arg(long)]
    pin: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deposit funds, e.g. `deposit 25.00`
    Deposit {
        #[arg(value_parser = parse_amount)]
        amount: u64,
    },
    /// Withdraw funds
    Withdraw {
        #[arg(value_parser = parse_amount)]
        amount: u64,
    },
    /// Transfer funds to another account
    Transfer {
        /// Destination account number
        to_account: String,
        #[arg(value_parser = parse_amount)]
        amount: u64,
    },
    /// Show the current balance
    Balance,
}

/// Parse "12", "12.3" or "12.34" into cents.
fn parse_amount(text: &str) -> Result<u64, String> {
    let invalid = || format!("invalid amount: {text}");
    let (whole, frac) = match text.split_once('.') {
        Some((_, "")) => return Err(invalid()),
        Some((whole, frac)) => (whole, frac),
        None => (text, ""),
    };
    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    if frac.len() > 2 || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let whole: u64 = whole.parse().map_err(|_| invalid())?;
    let frac: u64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<u64>().map_err(|_| invalid())? * 10,
        _ => frac.parse().map_err(|_| invalid())?,
    };
    let cents = whole
        .checked_mul(100)
        .and_then(|c| c.checked_add(frac))
        .ok_or_else(invalid)?;
    if cents == 0 {
        return Err("amount must be positive".to_string());
    }
    Ok(cents)
}

fn format_cents(cents: u64) -> String {
    format!("{}.{:02}", cents / 100, cents % 100)
}

fn print_response(response: &TransactionResponse) -> bool {
    if response.status.is_ok() {
        println!("OK (ref {})", response.reference_id);
    } else {
        println!("Rejected: {}", response.status);
    }
    if let Some(balance) = response.balance_after {
        println!("Balance: {}", format_cents(balance));
    }
    response.status.is_ok()
}

async fn run(cli: Cli) -> Result<bool, TransportError> {
    let password = Zeroizing::new(cli.password);

    let mut channel =
        TransactionChannel::connect(&cli.server, cli.pin, TransportConfig::default()).await?;
    if let Some(server) = channel.session().peer_identity() {
        debug!(fingerprint = %server.fingerprint(), "connected");
    }

    let login = channel.login(&cli.user, &password).await?;
    println!("Logged in as {} ({})", login.full_name, login.account_id);

    let account = login.account_id;
    let request = match cli.command {
        Command::Deposit { amount } => TransactionRequest::deposit(account, amount),
        Command::Withdraw { amount } => TransactionRequest::withdraw(account, amount),
        Command::Transfer { to_account, amount } => {
            TransactionRequest::transfer(account, to_account, amount)
        }
        Command::Balance => TransactionRequest::balance(account),
    };

    let response = channel.submit(request).await?;
    let applied = print_response(&response);
    channel.close().await?;
    Ok(applied)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => Ok(()),
        Ok(false) => std::process::exit(2),
        Err(e) => {
            debug!(error = %e, "request failed");
            eprintln!("{}", e.user_message());
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("12"), Ok(1200));
        assert_eq!(parse_amount("12.3"), Ok(1230));
        assert_eq!(parse_amount("12.34"), Ok(1234));
        assert_eq!(parse_amount("0.01"), Ok(1));
    }

    #[test]
    fn test_parse_amount_rejects() {
        let bad_inputs = [
            "",
            ".5",
            "12.345",
            "-3",
            "1e5",
            "abc",
            "0",
            "0.00",
            "12.",
            "184467440737095516.16",
        ];
        for bad in bad_inputs {
            assert!(parse_amount(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_format_cents() {
        assert_eq!(format_cents(0), "0.00");
        assert_eq!(format_cents(5), "0.05");
        assert_eq!(format_cents(123_456), "1234.56");
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "vaultwire", "--user", "alice", "--password", "pw", "transfer", "1234567890", "10.50",
        ])
        .unwrap();
        match cli.command {
            Command::Transfer { to_account, amount } => {
                assert_eq!(to_account, "1234567890");
                assert_eq!(amount, 1050);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(cli.server, DEFAULT_SERVER);
    }
}
