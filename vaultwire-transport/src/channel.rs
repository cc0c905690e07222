//! Transaction channel.
//!
//! The only user of [`SecureSession`]: every banking message is serialized,
//! sealed and written here, and every received frame is opened and
//! deserialized here.
//!
//! # Security Invariants
//!
//! - `TransactionChannel` does not implement `Clone`
//! - Any session, framing or codec error terminates the channel and zeroizes
//!   the session key. Nothing is retried.
//! - The server applies transactions only to the account logged in on this
//!   channel
//! - `Drop` terminates the session if `close()` was not called

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use vaultwire_core::session::unkeyed_frame_valid;
use vaultwire_core::{Frame, KeyPair, MessageType, SecureSession, SessionError};
use zeroize::Zeroizing;

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::handshake::HandshakeProtocol;
use crate::ledger::{Auth, Ledger};
use crate::transaction::{
    LoginRequest, LoginResponse, Request, Response, TransactionRequest, TransactionResponse,
    TransactionStatus,
};
use crate::wire::FramedStream;

/// Failed logins tolerated on one channel before the server hangs up.
pub const MAX_LOGIN_ATTEMPTS: u32 = 3;

/// An established, sealed banking connection.
pub struct TransactionChannel<S> {
    stream: FramedStream<S>,
    session: SecureSession,
    account: Option<String>,
}

impl<S> std::fmt::Debug for TransactionChannel<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionChannel")
            .field("session", &self.session)
            .field("logged_in", &self.account.is_some())
            .finish_non_exhaustive()
    }
}

impl TransactionChannel<TcpStream> {
    /// Connect to a server and run the client handshake.
    ///
    /// `pinned` restricts the server to one key fingerprint.
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        pinned: Option<String>,
        config: TransportConfig,
    ) -> Result<Self, TransportError> {
        let stream = timeout(config.handshake_timeout, TcpStream::connect(addr)).await??;
        stream.set_nodelay(true)?;
        Self::client(stream, pinned, config).await
    }
}

impl<S> TransactionChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Run the client handshake over an already-connected stream.
    pub async fn client(
        stream: S,
        pinned: Option<String>,
        config: TransportConfig,
    ) -> Result<Self, TransportError> {
        let protocol = match pinned {
            Some(fingerprint) => HandshakeProtocol::client_pinned(fingerprint),
            None => HandshakeProtocol::client(),
        };
        Self::establish(stream, protocol, config).await
    }

    /// Run the server handshake over an accepted stream.
    pub async fn accept(
        stream: S,
        keypair: Arc<KeyPair>,
        config: TransportConfig,
    ) -> Result<Self, TransportError> {
        Self::establish(stream, HandshakeProtocol::server(keypair), config).await
    }

    async fn establish(
        stream: S,
        protocol: HandshakeProtocol,
        config: TransportConfig,
    ) -> Result<Self, TransportError> {
        let mut stream = FramedStream::new(stream, config);
        let session = protocol.run(&mut stream).await?;
        Ok(Self {
            stream,
            session,
            account: None,
        })
    }

    /// The underlying sealed session.
    pub fn session(&self) -> &SecureSession {
        &self.session
    }

    /// Account bound by a successful login, if any.
    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }

    /// Check if the channel can still carry messages.
    pub fn is_active(&self) -> bool {
        self.session.is_established()
    }

    // --- Client side ---

    /// Authenticate this channel.
    ///
    /// A rejection leaves the channel usable; the server hangs up after
    /// [`MAX_LOGIN_ATTEMPTS`] rejections.
    ///
    /// # Errors
    ///
    /// `LoginRejected` if the server refused the credentials. Any other error
    /// terminates the channel.
    pub async fn login(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<LoginResponse, TransportError> {
        let request = Request::Login(LoginRequest::new(username, password));
        match self.exchange(&request).await? {
            Response::LoginAccepted(login) => {
                self.account = Some(login.account_id.clone());
                Ok(login)
            }
            Response::LoginRejected => Err(TransportError::LoginRejected),
            Response::Transaction(_) => Err(self.fail(TransportError::UnexpectedResponse)),
        }
    }

    /// Submit one transaction and wait for its outcome.
    ///
    /// A ledger rejection is a successful call whose status is not `Ok`.
    ///
    /// # Errors
    ///
    /// Any error terminates the channel.
    pub async fn submit(
        &mut self,
        request: TransactionRequest,
    ) -> Result<TransactionResponse, TransportError> {
        match self.exchange(&Request::Transaction(request)).await? {
            Response::Transaction(response) => Ok(response),
            _ => Err(self.fail(TransportError::UnexpectedResponse)),
        }
    }

    async fn exchange(&mut self, request: &Request) -> Result<Response, TransportError> {
        self.send(request).await?;
        self.receive().await
    }

    /// Send CLOSE and shut the stream down.
    pub async fn close(mut self) -> Result<(), TransportError> {
        let frame = self.session.close()?;
        let sent = self.stream.send_frame(&frame).await;
        self.stream.shutdown().await;
        sent
    }

    // --- Server side ---

    /// Answer requests until the client closes or a protocol error occurs.
    ///
    /// Returns `Ok(())` when the client sends CLOSE. A protocol error is
    /// reported with an ERROR frame before the error is returned.
    pub async fn serve(
        &mut self,
        ledger: &dyn Ledger,
        auth: &dyn Auth,
    ) -> Result<(), TransportError> {
        let mut failed_logins = 0u32;

        loop {
            let frame = match self.stream.recv_frame().await {
                Ok(frame) => frame,
                Err(err) => return Err(self.report(err).await),
            };

            if frame.msg_type() == MessageType::Close
                && frame.payload().is_empty()
                && unkeyed_frame_valid(self.session.primitives(), &frame)
            {
                debug!("client closed channel");
                self.session.terminate();
                return Ok(());
            }

            let request: Request = match self.open(&frame) {
                Ok(request) => request,
                Err(err) => return Err(self.report(err).await),
            };

            let response = match request {
                // A repeated login on an authenticated channel is refused
                // without counting towards the lockout.
                Request::Login(_) if self.account.is_some() => Response::LoginRejected,
                Request::Login(login) => {
                    let response = self.handle_login(&login, ledger, auth);
                    match response {
                        Response::LoginAccepted(_) => failed_logins = 0,
                        _ => failed_logins += 1,
                    }
                    response
                }
                Request::Transaction(request) => {
                    Response::Transaction(self.handle_transaction(&request, ledger))
                }
            };

            if let Err(err) = self.send(&response).await {
                return Err(self.report(err).await);
            }

            if failed_logins >= MAX_LOGIN_ATTEMPTS {
                warn!("too many failed logins, closing channel");
                if let Ok(close) = self.session.close() {
                    let _ = self.stream.send_frame(&close).await;
                }
                return Err(TransportError::LoginRejected);
            }
        }
    }

    fn handle_login(
        &mut self,
        login: &LoginRequest,
        ledger: &dyn Ledger,
        auth: &dyn Auth,
    ) -> Response {
        match ledger.credentials(&login.username) {
            Some(creds) if auth.verify_password(&creds.password_hash, &login.password) => {
                info!(account = %creds.account_id, "login accepted");
                self.account = Some(creds.account_id.clone());
                Response::LoginAccepted(LoginResponse {
                    account_id: creds.account_id,
                    full_name: creds.full_name,
                })
            }
            _ => {
                info!("login rejected");
                Response::LoginRejected
            }
        }
    }

    fn handle_transaction(
        &self,
        request: &TransactionRequest,
        ledger: &dyn Ledger,
    ) -> TransactionResponse {
        let Some(account) = self.account.as_deref() else {
            return TransactionResponse::rejected(TransactionStatus::NotLoggedIn, None);
        };
        if request.account_id != account {
            return TransactionResponse::rejected(
                TransactionStatus::AccountMismatch,
                ledger.balance(account),
            );
        }

        match ledger.apply(account, request) {
            Ok(response) => {
                info!(
                    account,
                    operation = %request.operation,
                    reference = %response.reference_id,
                    "transaction applied"
                );
                response
            }
            Err(err) => {
                info!(
                    account,
                    operation = %request.operation,
                    reason = %err,
                    "transaction rejected"
                );
                TransactionResponse::rejected(err.into(), ledger.balance(account))
            }
        }
    }

    // --- Sealed I/O ---

    async fn send<T: Serialize>(&mut self, message: &T) -> Result<(), TransportError> {
        let result = self.send_inner(message).await;
        result.map_err(|err| self.fail(err))
    }

    async fn send_inner<T: Serialize>(&mut self, message: &T) -> Result<(), TransportError> {
        let plaintext = Zeroizing::new(serde_json::to_vec(message)?);
        let frame = self.session.seal(&plaintext)?;
        self.stream.send_frame(&frame).await
    }

    async fn receive<T: DeserializeOwned>(&mut self) -> Result<T, TransportError> {
        let result = match self.stream.recv_frame().await {
            Ok(frame) => self.open(&frame),
            Err(err) => Err(err),
        };
        result.map_err(|err| self.fail(err))
    }

    fn open<T: DeserializeOwned>(&mut self, frame: &Frame) -> Result<T, TransportError> {
        match frame.msg_type() {
            MessageType::Error => {
                if !unkeyed_frame_valid(self.session.primitives(), frame) {
                    return Err(SessionError::IntegrityFailure.into());
                }
                let &[reported] = frame.payload() else {
                    return Err(TransportError::MalformedFrame);
                };
                return Err(TransportError::PeerError(reported));
            }
            MessageType::Close if !frame.payload().is_empty() => {
                return Err(TransportError::MalformedFrame);
            }
            _ => {}
        }

        let plaintext = self.session.open(frame)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    /// Terminate on any error. One strike.
    fn fail(&mut self, err: TransportError) -> TransportError {
        self.session.terminate();
        err
    }

    /// Server side: log, tell the peer, terminate.
    async fn report(&mut self, err: TransportError) -> TransportError {
        match err {
            TransportError::Disconnected => debug!("client disconnected"),
            ref err => {
                warn!(error = %err, "channel error");
                self.stream.send_error(err.wire_code()).await;
            }
        }
        self.fail(err)
    }
}

impl<S> Drop for TransactionChannel<S> {
    fn drop(&mut self) {
        self.session.terminate();
    }
}
