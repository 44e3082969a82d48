//! Integration tests driving a real connection against a scripted in-process
//! server over TCP.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio_stream::StreamExt;
use uuid::Uuid;

use smb_client::config::SMBConfig;
use smb_client::connection::{Session, SessionState, SMBConnection, TcpConnection};
use smb_client::event::{SMBEvent, SMBEventBus};
use smb_client::protocol::body::{
    Capabilities, SMBBody, SMBDialect, SMBEchoRequest, SMBEchoResponse, SMBLogoffResponse,
    SMBNegotiateResponse, SMBSessionFlags, SMBSessionSetupResponse, SecurityMode,
};
use smb_client::protocol::header::{SMBCommandCode, SMBFlags, SMBHeader};
use smb_client::protocol::message::SMBMessage;
use smb_client::transport::{SMBFrameReader, SMBFrameWriter};
use smb_client::util::auth::{AuthContext, Authenticator, AuthenticatorFactory};
use smb_client::{NTStatus, SMBError, SMBResult};

const STATUS_SUCCESS: u32 = 0;
const STATUS_PENDING: u32 = 0x0000_0103;
const STATUS_MORE_PROCESSING_REQUIRED: u32 = 0xC000_0016;
const STATUS_LOGON_FAILURE: u32 = 0xC000_006D;

/// Server side of one accepted connection.
struct ServerPeer {
    reader: SMBFrameReader<OwnedReadHalf>,
    writer: SMBFrameWriter<OwnedWriteHalf>,
}

impl ServerPeer {
    async fn accept(listener: TcpListener) -> Self {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, write) = stream.into_split();
        Self {
            reader: SMBFrameReader::new(read),
            writer: SMBFrameWriter::new(write),
        }
    }

    async fn read_request(&mut self) -> SMBMessage {
        let frame = self.reader.read_frame().await.unwrap();
        let (_, message) = SMBMessage::parse_request(&frame).unwrap();
        message
    }

    async fn respond(&mut self, message: &SMBMessage) {
        self.writer.write_message(message).await.unwrap();
    }

    /// Serves the NEGOTIATE exchange and returns the client's request.
    async fn handle_negotiate(
        &mut self,
        dialect: SMBDialect,
        capabilities: Capabilities,
        credits: u16,
        gss_token: Vec<u8>,
    ) -> SMBMessage {
        let request = self.read_request().await;
        assert_eq!(request.header.command, SMBCommandCode::Negotiate);
        assert_eq!(request.header.message_id, 0);
        let body = SMBNegotiateResponse::new(
            SecurityMode::NEGOTIATE_SIGNING_ENABLED,
            dialect,
            Uuid::new_v4(),
            capabilities,
            0x0010_0000,
            0x0010_0000,
            0x0010_0000,
            gss_token,
        );
        let header = response_header(&request.header, STATUS_SUCCESS, credits, 0);
        self.respond(&SMBMessage::new(header, SMBBody::NegotiateResponse(body)))
            .await;
        request
    }

    /// Serves one SESSION_SETUP round and returns the client's request.
    async fn handle_session_setup(
        &mut self,
        status: u32,
        session_id: u64,
        buffer: Vec<u8>,
        credits: u16,
    ) -> SMBMessage {
        let request = self.read_request().await;
        assert_eq!(request.header.command, SMBCommandCode::SessionSetup);
        let body = SMBSessionSetupResponse::new(SMBSessionFlags::empty(), buffer);
        let header = response_header(&request.header, status, credits, session_id);
        self.respond(&SMBMessage::new(
            header,
            SMBBody::SessionSetupResponse(body),
        ))
        .await;
        request
    }
}

fn response_header(request: &SMBHeader, status: u32, credits: u16, session_id: u64) -> SMBHeader {
    let mut header = SMBHeader::new_request(request.command);
    header.flags = SMBFlags::SERVER_TO_REDIR;
    header.status = status;
    header.credits = credits;
    header.message_id = request.message_id;
    header.session_id = session_id;
    header
}

fn echo_message() -> SMBMessage {
    SMBMessage::new(
        SMBHeader::new_request(SMBCommandCode::Echo),
        SMBBody::EchoRequest(SMBEchoRequest::new()),
    )
}

async fn bind() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

async fn eventually_disconnected(connection: &TcpConnection) {
    for _ in 0..100 {
        if !connection.is_connected() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("connection should have been torn down");
}

struct StubAuthenticator;

impl Authenticator for StubAuthenticator {
    fn authenticate(
        &mut self,
        _context: &AuthContext,
        input_token: &[u8],
        _session: &Session,
    ) -> SMBResult<Vec<u8>> {
        Ok(vec![0xAB, input_token.len() as u8])
    }
}

struct StubAuthenticatorFactory;

impl AuthenticatorFactory for StubAuthenticatorFactory {
    fn mechanism_oid(&self) -> &[u8] {
        &[0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x02, 0x02, 0x0a]
    }

    fn supports(&self, _context: &AuthContext) -> bool {
        true
    }

    fn create(&self) -> Box<dyn Authenticator> {
        Box::new(StubAuthenticator)
    }
}

fn stub_config() -> SMBConfig {
    SMBConfig::builder()
        .authenticators(vec![Arc::new(StubAuthenticatorFactory) as Arc<dyn AuthenticatorFactory>])
        .transact_timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

// ---------------------------------------------------------------------------
// Negotiation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn negotiate_records_the_protocol() {
    let (listener, port) = bind().await;
    let server = tokio::spawn(async move {
        let mut peer = ServerPeer::accept(listener).await;
        peer.handle_negotiate(SMBDialect::V3_0_0, Capabilities::LARGE_MTU, 1, Vec::new())
            .await
    });

    let connection = SMBConnection::connect(
        "127.0.0.1",
        port,
        stub_config(),
        SMBEventBus::new(),
    )
    .await
    .unwrap();

    let request = server.await.unwrap();
    assert_eq!(
        request.header.credit_charge, 1,
        "negotiate is a single-credit request"
    );

    assert!(connection.is_connected());
    let protocol = connection.negotiated_protocol().unwrap();
    assert_eq!(protocol.dialect(), SMBDialect::V3_0_0);
    assert!(protocol.capabilities().contains(Capabilities::LARGE_MTU));
    assert_eq!(protocol.max_read_size(), 0x0010_0000);
    // One credit spent on NEGOTIATE, one granted back.
    assert_eq!(connection.info().sequence_window().available(), 1);

    connection.close(true).await.unwrap();
}

#[tokio::test]
async fn unexpected_negotiate_response_fails_the_connect() {
    let (listener, port) = bind().await;
    let server = tokio::spawn(async move {
        let mut peer = ServerPeer::accept(listener).await;
        let request = peer.read_request().await;
        // Answer the NEGOTIATE with an echo response.
        let mut header = response_header(&request.header, STATUS_SUCCESS, 1, 0);
        header.command = SMBCommandCode::Echo;
        peer.respond(&SMBMessage::new(
            header,
            SMBBody::EchoResponse(SMBEchoResponse::new()),
        ))
        .await;
    });

    let result = SMBConnection::connect(
        "127.0.0.1",
        port,
        stub_config(),
        SMBEventBus::new(),
    )
    .await;
    assert!(matches!(result, Err(SMBError::ResponseError(_))));
    server.await.unwrap();
}

// ---------------------------------------------------------------------------
// Credit accounting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn multi_credit_request_spans_contiguous_message_ids() {
    let (listener, port) = bind().await;
    let server = tokio::spawn(async move {
        let mut peer = ServerPeer::accept(listener).await;
        peer.handle_negotiate(SMBDialect::V3_0_0, Capabilities::LARGE_MTU, 10, Vec::new())
            .await;

        // 131073 bytes of payload with LARGE_MTU: three credits charged,
        // CreditRequest = max(512 - 10 - 3, 3) = 499.
        let request = peer.read_request().await;
        assert_eq!(request.header.command, SMBCommandCode::Echo);
        assert_eq!(request.header.message_id, 1);
        assert_eq!(request.header.credit_charge, 3);
        assert_eq!(request.header.credits, 499);
        let header = response_header(&request.header, STATUS_SUCCESS, 3, 0);
        peer.respond(&SMBMessage::new(
            header,
            SMBBody::EchoResponse(SMBEchoResponse::new()),
        ))
        .await;

        // Message ids 1..=3 are consumed; the follow-up starts at 4.
        let request = peer.read_request().await;
        assert_eq!(request.header.message_id, 4);
        assert_eq!(request.header.credit_charge, 1);
        let header = response_header(&request.header, STATUS_SUCCESS, 1, 0);
        peer.respond(&SMBMessage::new(
            header,
            SMBBody::EchoResponse(SMBEchoResponse::new()),
        ))
        .await;
    });

    let connection =
        SMBConnection::connect("127.0.0.1", port, stub_config(), SMBEventBus::new())
            .await
            .unwrap();

    let future = connection
        .send(echo_message().with_max_payload_size(131073))
        .await
        .unwrap();
    future.await_response(Duration::from_secs(5)).await.unwrap();

    let future = connection.send(echo_message()).await.unwrap();
    future.await_response(Duration::from_secs(5)).await.unwrap();

    server.await.unwrap();
    connection.close(true).await.unwrap();
}

#[tokio::test]
async fn multi_credit_request_without_large_mtu_charges_one() {
    let (listener, port) = bind().await;
    let server = tokio::spawn(async move {
        let mut peer = ServerPeer::accept(listener).await;
        peer.handle_negotiate(SMBDialect::V2_1_0, Capabilities::empty(), 10, Vec::new())
            .await;

        let request = peer.read_request().await;
        assert_eq!(request.header.message_id, 1);
        assert_eq!(request.header.credit_charge, 1);
        let header = response_header(&request.header, STATUS_SUCCESS, 1, 0);
        peer.respond(&SMBMessage::new(
            header,
            SMBBody::EchoResponse(SMBEchoResponse::new()),
        ))
        .await;

        let request = peer.read_request().await;
        assert_eq!(request.header.message_id, 2);
    });

    let connection =
        SMBConnection::connect("127.0.0.1", port, stub_config(), SMBEventBus::new())
            .await
            .unwrap();

    let future = connection
        .send(echo_message().with_max_payload_size(131073))
        .await
        .unwrap();
    future.await_response(Duration::from_secs(5)).await.unwrap();

    let _ = connection.send(echo_message()).await.unwrap();

    server.await.unwrap();
    connection.close(true).await.unwrap();
}

// ---------------------------------------------------------------------------
// Asynchronous responses
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pending_async_response_does_not_complete_the_future() {
    let (listener, port) = bind().await;
    let (interim_sent_tx, interim_sent_rx) = tokio::sync::oneshot::channel();
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let mut peer = ServerPeer::accept(listener).await;
        peer.handle_negotiate(SMBDialect::V3_0_0, Capabilities::LARGE_MTU, 10, Vec::new())
            .await;

        let request = peer.read_request().await;
        let mut interim = response_header(&request.header, STATUS_PENDING, 0, 0);
        interim.flags |= SMBFlags::ASYNC_COMMAND;
        interim.async_id = 0xABCD;
        // Interim responses carry the error body.
        peer.respond(&SMBMessage::new(
            interim,
            SMBBody::Raw(vec![9, 0, 0, 0, 0, 0, 0, 0]),
        ))
        .await;
        interim_sent_tx.send(()).unwrap();

        release_rx.await.unwrap();
        let header = response_header(&request.header, STATUS_SUCCESS, 1, 0);
        peer.respond(&SMBMessage::new(
            header,
            SMBBody::EchoResponse(SMBEchoResponse::new()),
        ))
        .await;
    });

    let connection =
        SMBConnection::connect("127.0.0.1", port, stub_config(), SMBEventBus::new())
            .await
            .unwrap();

    let future = connection.send(echo_message()).await.unwrap();
    let message_id = future.message_id();
    let waiter = tokio::spawn(future.await_response(Duration::from_secs(10)));

    interim_sent_rx.await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The request is still outstanding, now carrying the server's AsyncId.
    assert!(!waiter.is_finished());
    let outstanding = connection.info().outstanding_requests();
    assert!(outstanding.is_outstanding(message_id));
    assert_eq!(outstanding.async_id_of(message_id), Some(0xABCD));
    assert_eq!(outstanding.message_id_for_async(0xABCD), Some(message_id));

    release_tx.send(()).unwrap();
    let response = waiter.await.unwrap().unwrap();
    assert_eq!(response.header.nt_status(), NTStatus::StatusSuccess);
    assert!(!outstanding.is_outstanding(message_id));

    server.await.unwrap();
    connection.close(true).await.unwrap();
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

#[tokio::test]
async fn two_round_authentication_promotes_the_session() {
    let (listener, port) = bind().await;
    let server = tokio::spawn(async move {
        let mut peer = ServerPeer::accept(listener).await;
        peer.handle_negotiate(SMBDialect::V3_0_0, Capabilities::LARGE_MTU, 10, Vec::new())
            .await;

        // Round one: the stub sends [0xAB, 0] (empty initial token).
        let request = peer
            .handle_session_setup(STATUS_MORE_PROCESSING_REQUIRED, 0x1010, vec![1, 2, 3], 1)
            .await;
        assert_eq!(request.header.session_id, 0);
        let SMBBody::SessionSetupRequest(body) = request.body else {
            panic!("expected a session setup request");
        };
        assert_eq!(body.buffer(), &[0xAB, 0]);

        // Round two: the client echoes the server-assigned id and feeds the
        // challenge back through the stub.
        let request = peer
            .handle_session_setup(STATUS_SUCCESS, 0x1010, Vec::new(), 1)
            .await;
        assert_eq!(request.header.session_id, 0x1010);
        let SMBBody::SessionSetupRequest(body) = request.body else {
            panic!("expected a session setup request");
        };
        assert_eq!(body.buffer(), &[0xAB, 3]);
    });

    let connection =
        SMBConnection::connect("127.0.0.1", port, stub_config(), SMBEventBus::new())
            .await
            .unwrap();
    let session = connection
        .authenticate(&AuthContext::new("user", "pass", "DOMAIN"))
        .await
        .unwrap();

    assert_eq!(session.id(), 0x1010);
    assert_eq!(session.state(), SessionState::Valid);
    assert!(connection.info().session_table().find(0x1010).is_some());
    assert!(connection
        .info()
        .preauth_session_table()
        .find(0x1010)
        .is_none());

    server.await.unwrap();
    connection.close(true).await.unwrap();
}

#[tokio::test]
async fn failed_authentication_leaves_no_session_behind() {
    let (listener, port) = bind().await;
    let server = tokio::spawn(async move {
        let mut peer = ServerPeer::accept(listener).await;
        peer.handle_negotiate(SMBDialect::V3_0_0, Capabilities::LARGE_MTU, 10, Vec::new())
            .await;
        peer.handle_session_setup(STATUS_LOGON_FAILURE, 0x2020, Vec::new(), 1)
            .await;
    });

    let connection =
        SMBConnection::connect("127.0.0.1", port, stub_config(), SMBEventBus::new())
            .await
            .unwrap();
    let result = connection
        .authenticate(&AuthContext::new("user", "wrong", "DOMAIN"))
        .await;

    match result {
        Err(SMBError::AuthenticationError { status, .. }) => {
            assert_eq!(status, NTStatus::StatusLogonFailure);
        }
        other => panic!("expected an authentication error, got {:?}", other.map(|s| s.id())),
    }
    assert!(connection.info().session_table().is_empty());
    assert!(connection.info().preauth_session_table().is_empty());

    server.await.unwrap();
    connection.close(true).await.unwrap();
}

// ---------------------------------------------------------------------------
// Signing policy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unsigned_response_fails_the_connection_when_signing_is_required() {
    let (listener, port) = bind().await;
    let server = tokio::spawn(async move {
        let mut peer = ServerPeer::accept(listener).await;
        peer.handle_negotiate(SMBDialect::V3_0_0, Capabilities::LARGE_MTU, 10, Vec::new())
            .await;
        peer.handle_session_setup(STATUS_SUCCESS, 42, Vec::new(), 1).await;

        // A session-bound response with the SIGNED flag clear.
        let request = peer.read_request().await;
        let header = response_header(&request.header, STATUS_SUCCESS, 1, 42);
        peer.respond(&SMBMessage::new(
            header,
            SMBBody::EchoResponse(SMBEchoResponse::new()),
        ))
        .await;
    });

    let config = SMBConfig::builder()
        .authenticators(vec![
            Arc::new(StubAuthenticatorFactory) as Arc<dyn AuthenticatorFactory>
        ])
        .signing_required(true)
        .transact_timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    let connection = SMBConnection::connect("127.0.0.1", port, config, SMBEventBus::new())
        .await
        .unwrap();
    let session = connection
        .authenticate(&AuthContext::new("user", "pass", "DOMAIN"))
        .await
        .unwrap();
    assert_eq!(session.id(), 42);

    let mut echo = echo_message();
    echo.header.session_id = 42;
    let future = connection.send(echo).await.unwrap();
    let result = future.await_response(Duration::from_secs(5)).await;
    assert!(matches!(result, Err(SMBError::TransportError(_))));

    eventually_disconnected(&connection).await;
    server.await.unwrap();
}

// ---------------------------------------------------------------------------
// Error fan-out and teardown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_message_id_tears_the_connection_down() {
    let (listener, port) = bind().await;
    let server = tokio::spawn(async move {
        let mut peer = ServerPeer::accept(listener).await;
        peer.handle_negotiate(SMBDialect::V3_0_0, Capabilities::LARGE_MTU, 10, Vec::new())
            .await;

        // A response nobody asked for.
        let mut header = SMBHeader::new_request(SMBCommandCode::Echo);
        header.flags = SMBFlags::SERVER_TO_REDIR;
        header.message_id = 99;
        header.credits = 1;
        peer.respond(&SMBMessage::new(
            header,
            SMBBody::EchoResponse(SMBEchoResponse::new()),
        ))
        .await;
    });

    let connection =
        SMBConnection::connect("127.0.0.1", port, stub_config(), SMBEventBus::new())
            .await
            .unwrap();
    server.await.unwrap();
    eventually_disconnected(&connection).await;
}

#[tokio::test]
async fn close_logs_sessions_off_and_publishes_events() {
    let (listener, port) = bind().await;
    let server = tokio::spawn(async move {
        let mut peer = ServerPeer::accept(listener).await;
        peer.handle_negotiate(SMBDialect::V3_0_0, Capabilities::LARGE_MTU, 10, Vec::new())
            .await;
        peer.handle_session_setup(STATUS_SUCCESS, 0x3030, Vec::new(), 1)
            .await;

        let request = peer.read_request().await;
        assert_eq!(request.header.command, SMBCommandCode::LogOff);
        assert_eq!(request.header.session_id, 0x3030);
        let header = response_header(&request.header, STATUS_SUCCESS, 1, 0x3030);
        peer.respond(&SMBMessage::new(
            header,
            SMBBody::LogoffResponse(SMBLogoffResponse::new()),
        ))
        .await;
    });

    let bus = SMBEventBus::new();
    let mut events = bus.subscribe();
    let connection = SMBConnection::connect("127.0.0.1", port, stub_config(), bus.clone())
        .await
        .unwrap();
    connection
        .authenticate(&AuthContext::new("user", "pass", "DOMAIN"))
        .await
        .unwrap();

    connection.close(false).await.unwrap();
    server.await.unwrap();

    assert!(!connection.is_connected());
    assert!(connection.info().session_table().is_empty());

    let logged_off = tokio::time::timeout(Duration::from_secs(1), events.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(logged_off, SMBEvent::SessionLoggedOff { session_id: 0x3030 });
    let closed = tokio::time::timeout(Duration::from_secs(1), events.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(
        closed,
        SMBEvent::ConnectionClosed {
            host: "127.0.0.1".into(),
            port,
        }
    );

    // close is idempotent.
    connection.close(false).await.unwrap();
}
