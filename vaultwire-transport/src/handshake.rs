//! Key exchange over a stream.
//!
//! Drives the sans-IO state machines in `vaultwire_core::handshake` with
//! [`FramedStream`] I/O, bounded by the handshake timeout.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tracing::{debug, warn};
use vaultwire_core::{ClientHandshake, KeyPair, SecureSession, ServerHandshake};

use crate::error::TransportError;
use crate::wire::FramedStream;

/// Which side of the key exchange to run.
pub enum HandshakeProtocol {
    /// Connecting side. Generates the session key.
    Client {
        /// Expected server fingerprint, if pinned.
        pinned: Option<String>,
    },
    /// Accepting side. Owns the identity keypair.
    Server {
        /// Server identity.
        keypair: Arc<KeyPair>,
    },
}

impl std::fmt::Debug for HandshakeProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Client { pinned } => f.debug_struct("Client").field("pinned", pinned).finish(),
            Self::Server { keypair } => f
                .debug_struct("Server")
                .field("fingerprint", &keypair.public_key().fingerprint())
                .finish(),
        }
    }
}

impl HandshakeProtocol {
    /// Client accepting any server key.
    pub fn client() -> Self {
        Self::Client { pinned: None }
    }

    /// Client accepting only the server key with this fingerprint.
    pub fn client_pinned(fingerprint: impl Into<String>) -> Self {
        Self::Client {
            pinned: Some(fingerprint.into()),
        }
    }

    /// Server presenting `keypair`.
    pub fn server(keypair: Arc<KeyPair>) -> Self {
        Self::Server { keypair }
    }

    /// Run the exchange to completion.
    ///
    /// On failure the server side sends an ERROR frame before returning; the
    /// caller must drop the connection either way.
    ///
    /// # Errors
    ///
    /// `Handshake` for protocol failures, `Timeout` if the exchange does not
    /// finish within the handshake timeout, plus framing and I/O errors.
    pub async fn run<S>(self, stream: &mut FramedStream<S>) -> Result<SecureSession, TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let limit = stream.config().handshake_timeout;
        let is_server = matches!(self, Self::Server { .. });

        let result = match timeout(limit, self.exchange(stream)).await {
            Ok(result) => result,
            Err(elapsed) => Err(elapsed.into()),
        };

        if let Err(err) = &result {
            warn!(error = %err, "handshake failed");
            if is_server {
                stream.send_error(err.wire_code()).await;
            }
        }
        result
    }

    async fn exchange<S>(
        self,
        stream: &mut FramedStream<S>,
    ) -> Result<SecureSession, TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let max_payload = stream.config().max_payload;

        match self {
            Self::Server { keypair } => {
                let mut handshake = ServerHandshake::new(keypair).with_max_payload(max_payload);
                let hello = handshake.start()?;
                stream.send_frame(&hello).await?;

                let reply = stream.recv_frame().await?;
                let session = handshake.receive(&reply)?;
                debug!("server handshake complete");
                Ok(session)
            }
            Self::Client { pinned } => {
                let mut handshake = ClientHandshake::new().with_max_payload(max_payload);
                if let Some(fingerprint) = pinned {
                    handshake = handshake.with_pinned_fingerprint(fingerprint);
                }
                handshake.start()?;

                let hello = stream.recv_frame().await?;
                let (reply, session) = handshake.receive(&hello)?;
                stream.send_frame(&reply).await?;

                if let Some(server) = session.peer_identity() {
                    debug!(fingerprint = %server.fingerprint(), "client handshake complete");
                }
                Ok(session)
            }
        }
    }
}
