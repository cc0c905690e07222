//! VaultWire server entry point.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vaultwire_core::primitives::DEFAULT_KEY_BITS;
use vaultwire_core::DEFAULT_MAX_PAYLOAD;
use vaultwire_server::{
    identity, run_server, InMemoryLedger, ServerContext, DEFAULT_MAX_CONN_PER_IP,
};
use vaultwire_transport::TransportConfig;

/// VaultWire banking server
#[derive(Parser, Debug)]
#[command(name = "vaultwire-server")]
#[command(about = "Secure banking transport server")]
#[command(version)]
struct Cli {
    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0:9443")]
    bind: String,

    /// Identity key (PKCS#1 PEM); created if missing
    #[arg(short, long, default_value = "vaultwire-server.pem")]
    key: PathBuf,

    /// Modulus size when a new key is generated
    #[arg(long, default_value_t = DEFAULT_KEY_BITS)]
    key_bits: usize,

    /// Accounts seed file (JSON array of {username, password, full_name, balance})
    #[arg(short, long)]
    accounts: Option<PathBuf>,

    /// Concurrent connections allowed per client IP
    #[arg(long, default_value_t = DEFAULT_MAX_CONN_PER_IP)]
    max_conn_per_ip: usize,

    /// Seconds to wait for each client frame
    #[arg(long, default_value_t = 30)]
    read_timeout_secs: u64,

    /// Largest accepted frame payload in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_PAYLOAD)]
    max_payload: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let keypair = identity::load_or_create(&cli.key, cli.key_bits)
        .with_context(|| format!("identity key {}", cli.key.display()))?;

    let ledger = match &cli.accounts {
        Some(path) => InMemoryLedger::load_seed(path)
            .with_context(|| format!("accounts file {}", path.display()))?,
        None => {
            warn!("no accounts file given, starting with an empty ledger");
            InMemoryLedger::new()
        }
    };
    info!(accounts = ledger.len(), "ledger ready");

    let config = TransportConfig::default()
        .with_read_timeout(Duration::from_secs(cli.read_timeout_secs))
        .with_max_payload(cli.max_payload);

    let ctx = ServerContext::new(Arc::new(keypair), Arc::new(ledger))
        .with_config(config)
        .with_max_conn_per_ip(cli.max_conn_per_ip);

    let listener = TcpListener::bind(&cli.bind)
        .await
        .with_context(|| format!("bind {}", cli.bind))?;
    println!("Server fingerprint: {}", ctx.fingerprint());

    tokio::select! {
        _ = run_server(listener, ctx) => {}
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    Ok(())
}
