//! VaultWire Server
//!
//! Concurrent TCP accept loop: one task per connection, one sealed session per
//! task, a shared ledger behind an `Arc`.
//!
//! Connections per client IP are capped; excess connections are dropped
//! before any handshake work is done.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

pub mod error;
pub mod identity;
pub mod ledger;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};
use vaultwire_core::KeyPair;
use vaultwire_transport::{
    Auth, Ledger, Sha256Auth, TransactionChannel, TransportConfig, TransportError,
};

pub use error::ServerError;
pub use ledger::{InMemoryLedger, SeedAccount};

/// Default cap on concurrent connections from one IP.
pub const DEFAULT_MAX_CONN_PER_IP: usize = 5;

type IpConnMap = Arc<DashMap<IpAddr, usize>>;

/// Everything a connection handler needs. Cheap to clone.
#[derive(Clone)]
pub struct ServerContext {
    keypair: Arc<KeyPair>,
    ledger: Arc<dyn Ledger>,
    auth: Arc<dyn Auth>,
    config: TransportConfig,
    max_conn_per_ip: usize,
}

impl std::fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerContext")
            .field("fingerprint", &self.keypair.public_key().fingerprint())
            .field("config", &self.config)
            .field("max_conn_per_ip", &self.max_conn_per_ip)
            .finish_non_exhaustive()
    }
}

impl ServerContext {
    /// Context with SHA-256 password checks and default limits.
    pub fn new(keypair: Arc<KeyPair>, ledger: Arc<dyn Ledger>) -> Self {
        Self {
            keypair,
            ledger,
            auth: Arc::new(Sha256Auth),
            config: TransportConfig::default(),
            max_conn_per_ip: DEFAULT_MAX_CONN_PER_IP,
        }
    }

    /// Replace the password checker.
    pub fn with_auth(mut self, auth: Arc<dyn Auth>) -> Self {
        self.auth = auth;
        self
    }

    /// Replace the per-connection limits.
    pub fn with_config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the per-IP connection cap.
    pub fn with_max_conn_per_ip(mut self, max: usize) -> Self {
        self.max_conn_per_ip = max;
        self
    }

    /// Fingerprint of the server identity, for out-of-band distribution.
    pub fn fingerprint(&self) -> String {
        self.keypair.public_key().fingerprint()
    }
}

/// Releases a per-IP slot when the connection task ends, however it ends.
struct ConnSlot {
    ip: IpAddr,
    conns: IpConnMap,
}

impl ConnSlot {
    fn acquire(conns: &IpConnMap, ip: IpAddr, max: usize) -> Option<Self> {
        // A zero cap never inserts; otherwise a refused entry is always owned
        // by live slots that remove it on drop.
        if max == 0 {
            return None;
        }
        let mut count = conns.entry(ip).or_insert(0);
        if *count >= max {
            return None;
        }
        *count += 1;
        Some(Self {
            ip,
            conns: conns.clone(),
        })
    }
}

impl Drop for ConnSlot {
    fn drop(&mut self) {
        if let Some(mut count) = self.conns.get_mut(&self.ip) {
            *count = count.saturating_sub(1);
        }
        self.conns.remove_if(&self.ip, |_, count| *count == 0);
    }
}

/// Accept connections forever.
///
/// Accept errors are logged and skipped.
pub async fn run_server(listener: TcpListener, ctx: ServerContext) {
    let ip_conns: IpConnMap = Arc::new(DashMap::new());

    if let Ok(addr) = listener.local_addr() {
        info!(%addr, fingerprint = %ctx.fingerprint(), "server listening");
    }

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };

        let Some(slot) = ConnSlot::acquire(&ip_conns, peer.ip(), ctx.max_conn_per_ip) else {
            warn!(%peer, "connection limit reached, dropping");
            continue;
        };

        let ctx = ctx.clone();
        tokio::spawn(async move {
            let _slot = slot;
            handle_connection(stream, peer, ctx).await;
        });
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, ctx: ServerContext) {
    info!(%peer, "connection accepted");
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%peer, error = %e, "set_nodelay failed");
    }

    let result = serve_connection(stream, &ctx).await;
    match result {
        Ok(()) => info!(%peer, "connection closed"),
        Err(TransportError::Disconnected) => info!(%peer, "connection dropped by client"),
        Err(e) => warn!(%peer, error = %e, "connection terminated"),
    }
}

async fn serve_connection(stream: TcpStream, ctx: &ServerContext) -> Result<(), TransportError> {
    let mut channel =
        TransactionChannel::accept(stream, ctx.keypair.clone(), ctx.config.clone()).await?;
    debug!("session established");
    channel.serve(ctx.ledger.as_ref(), ctx.auth.as_ref()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_conn_slot_cap_and_release() {
        let conns: IpConnMap = Arc::new(DashMap::new());
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);

        let first = ConnSlot::acquire(&conns, ip, 2).unwrap();
        let second = ConnSlot::acquire(&conns, ip, 2).unwrap();
        assert!(ConnSlot::acquire(&conns, ip, 2).is_none());

        drop(first);
        let third = ConnSlot::acquire(&conns, ip, 2).unwrap();

        drop(second);
        drop(third);
        assert!(conns.get(&ip).is_none());
    }

    #[test]
    fn test_conn_slot_per_ip() {
        let conns: IpConnMap = Arc::new(DashMap::new());
        let a = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let b = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

        let _a = ConnSlot::acquire(&conns, a, 1).unwrap();
        assert!(ConnSlot::acquire(&conns, a, 1).is_none());
        assert!(ConnSlot::acquire(&conns, b, 1).is_some());
    }

    #[test]
    fn test_conn_slot_zero_cap_leaves_no_entry() {
        let conns: IpConnMap = Arc::new(DashMap::new());
        for last in 1..=10u8 {
            let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, last));
            assert!(ConnSlot::acquire(&conns, ip, 0).is_none());
        }
        assert!(conns.is_empty());
    }
}
