//! Transaction channel over real loopback sockets.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock};

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use vaultwire_core::frame::HEADER_LEN;
use vaultwire_core::{Frame, KeyPair, MessageType, DEFAULT_MAX_PAYLOAD};
use vaultwire_transport::error::code;
use vaultwire_transport::{
    Credentials, FramedStream, HandshakeProtocol, Ledger, LedgerError, LoginRequest, Operation,
    Request, Sha256Auth, TransactionChannel, TransactionRequest, TransactionResponse,
    TransactionStatus, TransportConfig, TransportError,
};

const ACCOUNT: &str = "42";

struct SingleAccount {
    balance: Mutex<u64>,
}

impl Ledger for SingleAccount {
    fn apply(
        &self,
        account: &str,
        request: &TransactionRequest,
    ) -> Result<TransactionResponse, LedgerError> {
        if account != ACCOUNT {
            return Err(LedgerError::UnknownAccount);
        }
        let mut balance = self.balance.lock().unwrap();
        match request.operation {
            Operation::Deposit => *balance += request.amount,
            Operation::Withdraw => {
                *balance = balance
                    .checked_sub(request.amount)
                    .ok_or(LedgerError::InsufficientFunds)?;
            }
            Operation::Balance => {}
            Operation::Transfer { .. } => return Err(LedgerError::UnknownAccount),
        }
        Ok(TransactionResponse::ok(*balance))
    }

    fn credentials(&self, username: &str) -> Option<Credentials> {
        let users: HashMap<&str, &str> = [("carol", "hunter2")].into_iter().collect();
        users.get(username).map(|password| Credentials {
            account_id: ACCOUNT.to_string(),
            full_name: "Carol Client".to_string(),
            password_hash: Sha256Auth::hash_password(password),
        })
    }

    fn balance(&self, account: &str) -> Option<u64> {
        (account == ACCOUNT).then(|| *self.balance.lock().unwrap())
    }
}

fn keypair() -> Arc<KeyPair> {
    static KEY: OnceLock<Arc<KeyPair>> = OnceLock::new();
    KEY.get_or_init(|| Arc::new(KeyPair::generate(1024).expect("keygen failed")))
        .clone()
}

/// Accept a single connection and serve it; the task yields the serve result.
async fn serve_once() -> (SocketAddr, JoinHandle<Result<(), TransportError>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    let addr = listener.local_addr().expect("no local addr");

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await?;
        let mut channel =
            TransactionChannel::accept(stream, keypair(), TransportConfig::default()).await?;
        let ledger = SingleAccount {
            balance: Mutex::new(500),
        };
        channel.serve(&ledger, &Sha256Auth).await
    });
    (addr, handle)
}

#[tokio::test]
async fn test_deposit_over_tcp() {
    let (addr, server) = serve_once().await;
    let fingerprint = keypair().public_key().fingerprint();

    let mut channel =
        TransactionChannel::connect(addr, Some(fingerprint), TransportConfig::default())
            .await
            .expect("connect failed");

    let login = channel.login("carol", "hunter2").await.expect("login failed");
    assert_eq!(login.account_id, ACCOUNT);

    let response = channel
        .submit(TransactionRequest::deposit(ACCOUNT, 100))
        .await
        .expect("deposit failed");
    assert_eq!(response.status, TransactionStatus::Ok);
    assert_eq!(response.balance_after, Some(600));

    // Login request and deposit: two sealed messages each way.
    assert_eq!(channel.session().send_seq(), 2);
    assert_eq!(channel.session().recv_seq(), 2);

    channel.close().await.expect("close failed");
    server.await.expect("server task panicked").expect("server returned error");
}

#[tokio::test]
async fn test_transaction_before_login_is_refused() {
    let (addr, _server) = serve_once().await;
    let mut channel = TransactionChannel::connect(addr, None, TransportConfig::default())
        .await
        .expect("connect failed");

    let response = channel
        .submit(TransactionRequest::withdraw(ACCOUNT, 100))
        .await
        .expect("submit failed");
    assert_eq!(response.status, TransactionStatus::NotLoggedIn);
    assert_eq!(response.balance_after, None);
    assert!(channel.is_active());
}

#[tokio::test]
async fn test_tampered_frame_kills_session() {
    let (addr, server) = serve_once().await;
    let tcp = TcpStream::connect(addr).await.expect("connect failed");
    let mut stream = FramedStream::new(tcp, TransportConfig::default());

    let mut session = HandshakeProtocol::client()
        .run(&mut stream)
        .await
        .expect("handshake failed");

    let login = Request::Login(LoginRequest::new("carol", "hunter2"));
    let sealed = session
        .seal(&serde_json::to_vec(&login).expect("encode"))
        .expect("seal failed");

    let mut bytes = sealed.encode();
    bytes[HEADER_LEN + 3] ^= 0x01;
    let (tampered, _) = Frame::decode(&bytes, DEFAULT_MAX_PAYLOAD).expect("decode failed");
    stream.send_frame(&tampered).await.expect("send failed");

    let report = stream.recv_frame().await.expect("no error frame");
    assert_eq!(report.msg_type(), MessageType::Error);
    assert_eq!(report.payload(), &[code::SESSION]);

    let result = server.await.expect("server task panicked");
    assert!(matches!(result, Err(TransportError::Session(_))));

    // Nothing more comes from the server.
    assert!(matches!(stream.recv_frame().await, Err(TransportError::Disconnected)));
}

#[tokio::test]
async fn test_lockout_after_repeated_bad_logins() {
    let (addr, server) = serve_once().await;
    let mut channel = TransactionChannel::connect(addr, None, TransportConfig::default())
        .await
        .expect("connect failed");

    for _ in 0..3 {
        assert!(matches!(
            channel.login("carol", "wrong").await,
            Err(TransportError::LoginRejected)
        ));
    }

    let result = server.await.expect("server task panicked");
    assert!(matches!(result, Err(TransportError::LoginRejected)));

    // The server has closed; the next request fails and the channel is dead.
    assert!(channel.login("carol", "hunter2").await.is_err());
    assert!(!channel.is_active());
}

#[tokio::test]
async fn test_lockout_counts_only_consecutive_failures() {
    let (addr, _server) = serve_once().await;
    let mut channel = TransactionChannel::connect(addr, None, TransportConfig::default())
        .await
        .expect("connect failed");

    for _ in 0..2 {
        assert!(matches!(
            channel.login("carol", "wrong").await,
            Err(TransportError::LoginRejected)
        ));
    }
    channel.login("carol", "hunter2").await.expect("login failed");

    // Repeated logins on an authenticated channel are refused but never lock it.
    for _ in 0..3 {
        assert!(matches!(
            channel.login("carol", "hunter2").await,
            Err(TransportError::LoginRejected)
        ));
    }
    assert!(channel.is_active());
    assert_eq!(channel.account(), Some(ACCOUNT));

    let response = channel
        .submit(TransactionRequest::balance(ACCOUNT))
        .await
        .expect("balance failed");
    assert_eq!(response.status, TransactionStatus::Ok);
    assert_eq!(response.balance_after, Some(500));
    channel.close().await.expect("close failed");
}
