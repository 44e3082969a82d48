//! The connection engine: dialect negotiation, credit-based flow control,
//! request/response correlation, authentication and teardown for a single
//! SMB2/3 conversation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use smb_client_core::error::SMBError;
use smb_client_core::logging::{debug, info, trace, warn};
use smb_client_core::nt_status::NTStatus;
use smb_client_core::SMBResult;

use crate::config::SMBConfig;
use crate::event::{SMBEvent, SMBEventBus};
use crate::protocol::body::{
    Capabilities, SMBBody, SMBLogoffRequest, SMBNegotiateRequest, SMBSessionSetupRequest,
    SecurityMode,
};
use crate::protocol::header::{SMBCommandCode, SMBFlags, SMBHeader};
use crate::protocol::message::{Message, SMBMessage};
use crate::transport::{self, SMBFrameReader, SMBFrameWriter, SMBReadStream, SMBWriteStream};
use crate::util::auth::{AuthContext, Authenticator};
use crate::util::auth::spnego::SPNEGOToken;

mod info;
mod outstanding;
mod sequence_window;
mod session;

pub use info::{ConnectionInfo, NegotiatedProtocol};
pub use outstanding::{OutstandingRequests, Request, ResponseFuture};
pub use sequence_window::{SequenceWindow, PREFERRED_MINIMUM_CREDITS};
pub use session::{PacketSignatory, Session, SessionState, SessionTable};

/// Payload octets covered by a single credit ([MS-SMB2] 3.1.5.2).
pub const SINGLE_CREDIT_PAYLOAD_SIZE: u32 = 65536;

pub type TcpConnection = SMBConnection<OwnedWriteHalf>;

/// A connection to a server. Cheap to clone; all clones share the same
/// underlying conversation.
#[derive(Debug)]
pub struct SMBConnection<W: SMBWriteStream> {
    state: Arc<ConnectionState<W>>,
}

impl<W: SMBWriteStream> Clone for SMBConnection<W> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

#[derive(Debug)]
struct ConnectionState<W: SMBWriteStream> {
    config: SMBConfig,
    remote_host: String,
    remote_port: u16,
    info: ConnectionInfo,
    /// The send mutex: serializes id allocation, registration and the
    /// transport write, so message ids hit the wire in ascending order.
    /// Response handling never takes it.
    writer: Mutex<SMBFrameWriter<W>>,
    connected: AtomicBool,
    closing: AtomicBool,
    shutdown: CancellationToken,
    bus: SMBEventBus,
}

impl SMBConnection<OwnedWriteHalf> {
    /// Opens the transport, negotiates a dialect and returns the live
    /// connection. Connecting is the constructor, so "connect on an already
    /// connected connection" cannot be expressed.
    pub async fn connect(
        host: &str,
        port: u16,
        config: SMBConfig,
        bus: SMBEventBus,
    ) -> SMBResult<Self> {
        let (reader, writer) = transport::connect(host, port).await?;
        let state = Arc::new(ConnectionState {
            info: ConnectionInfo::new(config.client_guid()),
            config,
            remote_host: host.to_string(),
            remote_port: port,
            writer: Mutex::new(writer),
            connected: AtomicBool::new(true),
            closing: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            bus: bus.clone(),
        });
        spawn_receiver(state.clone(), reader);
        spawn_bus_listener(Arc::downgrade(&state), bus);

        let connection = Self { state };
        if let Err(error) = connection.state.negotiate_dialect().await {
            let _ = connection.state.close(true).await;
            return Err(error);
        }
        info!(host, port, "successfully connected");
        Ok(connection)
    }
}

impl<W: SMBWriteStream> SMBConnection<W> {
    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    pub fn remote_host(&self) -> &str {
        &self.state.remote_host
    }

    pub fn remote_port(&self) -> u16 {
        self.state.remote_port
    }

    pub fn config(&self) -> &SMBConfig {
        &self.state.config
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.state.info
    }

    pub fn negotiated_protocol(&self) -> Option<&NegotiatedProtocol> {
        self.state.info.negotiated()
    }

    /// Sends a packet and returns the future its response will be delivered
    /// through.
    pub async fn send(&self, message: SMBMessage) -> SMBResult<ResponseFuture> {
        self.state.send(message, None).await
    }

    /// Like [`Self::send`], signing the packet with the session's key when
    /// one is established.
    pub async fn send_for_session(
        &self,
        message: SMBMessage,
        session: &Session,
    ) -> SMBResult<ResponseFuture> {
        self.state.send(message, Some(session)).await
    }

    /// Sends a packet and waits for its response, bounded by the configured
    /// transact timeout.
    pub async fn send_and_receive(&self, message: SMBMessage) -> SMBResult<SMBMessage> {
        self.state.send_and_receive(message).await
    }

    /// Authenticates the caller, minting a session tracked by this
    /// connection.
    pub async fn authenticate(&self, context: &AuthContext) -> SMBResult<Arc<Session>> {
        self.state.authenticate(context).await
    }

    /// Logs the session off and removes it from the session table.
    pub async fn logoff(&self, session: &Session) -> SMBResult<()> {
        self.state.logoff_session(session).await
    }

    /// Closes the connection. Unless `force` is set, active sessions are
    /// logged off first (per-session errors are logged and swallowed).
    /// Idempotent.
    pub async fn close(&self, force: bool) -> SMBResult<()> {
        self.state.close(force).await
    }
}

fn spawn_receiver<R: SMBReadStream, W: SMBWriteStream>(
    state: Arc<ConnectionState<W>>,
    mut reader: SMBFrameReader<R>,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                frame = reader.read_frame() => {
                    let result = frame.and_then(|frame| state.handle(&frame));
                    if let Err(error) = result {
                        if state.shutdown.is_cancelled() {
                            break;
                        }
                        state.handle_error(error).await;
                        break;
                    }
                }
            }
        }
        trace!("receiver task finished");
    });
}

/// Listens for session logoffs published on the bus and drops the entry from
/// the session table. The weak handle keeps the subscription from pinning
/// the connection alive.
fn spawn_bus_listener<W: SMBWriteStream>(state: Weak<ConnectionState<W>>, bus: SMBEventBus) {
    let mut events = bus.subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let Ok(event) = event else {
                continue; // lagged behind, skip
            };
            if let SMBEvent::SessionLoggedOff { session_id } = event {
                let Some(state) = state.upgrade() else {
                    break;
                };
                if state.info.session_table().session_closed(session_id).is_some() {
                    debug!(session_id, "session logged off");
                }
            }
        }
    });
}

impl<W: SMBWriteStream> ConnectionState<W> {
    async fn send(
        &self,
        mut message: SMBMessage,
        session: Option<&Session>,
    ) -> SMBResult<ResponseFuture> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SMBError::transport_error("connection is not open"));
        }
        let mut writer = self.writer.lock().await;

        let window = self.info.sequence_window();
        let available = window.available();
        if available == 0 {
            warn!(
                command = ?message.header.command,
                "no credits left, sending anyway"
            );
        }
        let multi_credit = self.info.supports(Capabilities::LARGE_MTU);
        let grant = granted_credits(
            credits_needed(message.max_payload_size()),
            available,
            multi_credit,
        );
        let message_ids = window.get(grant)?;
        message.header.message_id = message_ids[0];
        message.header.credit_charge = grant as u16;
        message.header.credits = credit_request(available, grant);
        debug!(
            message_id = message.header.message_id,
            grant, available, "granted credits"
        );

        let (request, future) = Request::new(message.header.message_id, message.header.command);
        trace!(
            message_id = request.message_id(),
            correlation_id = %request.correlation_id(),
            "registering outstanding request"
        );
        self.info.outstanding_requests().register_outstanding(request);

        let signatory = session.map(Session::signatory).filter(|s| s.ready());
        if signatory.is_some() {
            message.header.flags |= SMBFlags::SIGNED;
        }
        let mut bytes = message.as_bytes();
        if let Some(signatory) = signatory {
            signatory.sign(&mut bytes)?;
        }
        writer.write_frame(&bytes).await?;
        Ok(future)
    }

    async fn send_and_receive(&self, message: SMBMessage) -> SMBResult<SMBMessage> {
        let future = self.send(message, None).await?;
        future.await_response(self.config.transact_timeout()).await
    }

    async fn negotiate_dialect(&self) -> SMBResult<()> {
        debug!(
            dialects = ?self.config.dialects(),
            host = %self.remote_host,
            "negotiating dialect"
        );
        let request = SMBNegotiateRequest::new(
            self.config.dialects().to_vec(),
            self.info.client_guid(),
            self.config.signing_required(),
        );
        let message = SMBMessage::new(
            SMBHeader::new_request(SMBCommandCode::Negotiate),
            SMBBody::NegotiateRequest(request),
        );
        let response = self.send_and_receive(message).await?;
        let SMBBody::NegotiateResponse(response_body) = response.body else {
            return Err(SMBError::response_error(
                "expected a NEGOTIATE response from the server",
            ));
        };
        let protocol = NegotiatedProtocol::from_response(&response_body);
        debug!(dialect = ?protocol.dialect(), "negotiated connection settings");
        self.info.record_negotiation(protocol)
    }

    async fn authenticate(&self, context: &AuthContext) -> SMBResult<Arc<Session>> {
        let negotiated = self
            .info
            .negotiated()
            .ok_or_else(|| SMBError::precondition_failed("connection is not negotiated"))?;
        let mut authenticator =
            self.select_authenticator(context, negotiated.gss_negotiate_token())?;
        authenticator.init()?;

        let signing_required =
            negotiated.server_requires_signing() || self.config.signing_required();
        let session = Arc::new(Session::new(0, signing_required, negotiated.dialect()));

        let initial_token = negotiated.gss_negotiate_token().to_vec();
        let result = self
            .authentication_rounds(&mut *authenticator, context, &session, initial_token)
            .await;

        // The session lives in exactly one table: drop the preauth entry
        // before promotion or on the way out of a failed exchange.
        let session_id = session.id();
        self.info.preauth_session_table().session_closed(session_id);
        match result {
            Ok(()) => {
                session.set_state(SessionState::Valid);
                self.info
                    .session_table()
                    .register_session(session_id, session.clone());
                info!(
                    session_id,
                    username = context.username(),
                    "successfully authenticated"
                );
                Ok(session)
            }
            Err(error) => Err(error),
        }
    }

    async fn authentication_rounds(
        &self,
        authenticator: &mut dyn Authenticator,
        context: &AuthContext,
        session: &Arc<Session>,
        initial_token: Vec<u8>,
    ) -> SMBResult<()> {
        let mut input_token = initial_token;
        let mut first_round = true;
        loop {
            let out_token = authenticator.authenticate(context, &input_token, session)?;
            let response = self.session_setup_round(session, out_token).await?;
            if first_round {
                session.set_id(response.header.session_id);
                self.info
                    .preauth_session_table()
                    .register_session(session.id(), session.clone());
                first_round = false;
            }
            match response.header.nt_status() {
                NTStatus::MoreProcessingRequired => {
                    debug!(
                        username = context.username(),
                        "more processing required for authentication"
                    );
                    input_token = session_setup_buffer(response)?;
                }
                NTStatus::StatusSuccess => {
                    let final_buffer = session_setup_buffer(response)?;
                    if !final_buffer.is_empty() {
                        // Feed the last buffer back so the mechanism can
                        // finalize its key material.
                        authenticator.authenticate(context, &final_buffer, session)?;
                    }
                    return Ok(());
                }
                status => {
                    return Err(SMBError::auth_error(
                        status,
                        format!(
                            "session setup for '{}' rejected with status {:#010x}",
                            context.username(),
                            response.header.status
                        ),
                    ));
                }
            }
        }
    }

    async fn session_setup_round(
        &self,
        session: &Session,
        token: Vec<u8>,
    ) -> SMBResult<SMBMessage> {
        let body = SMBSessionSetupRequest::new(SecurityMode::NEGOTIATE_SIGNING_ENABLED, token);
        let mut header = SMBHeader::new_request(SMBCommandCode::SessionSetup);
        header.session_id = session.id();
        self.send_and_receive(SMBMessage::new(header, SMBBody::SessionSetupRequest(body)))
            .await
    }

    /// Picks the first configured authenticator factory whose mechanism the
    /// server offers (or any, when the server sent no token) and which
    /// supports the given credentials.
    fn select_authenticator(
        &self,
        context: &AuthContext,
        gss_token: &[u8],
    ) -> SMBResult<Box<dyn Authenticator>> {
        let mech_types = if gss_token.is_empty() {
            Vec::new()
        } else {
            match SPNEGOToken::parse(gss_token)? {
                (_, SPNEGOToken::Init(init)) => init.mech_type_list,
                _ => Vec::new(),
            }
        };
        for factory in self.config.authenticators() {
            let offered = mech_types.is_empty()
                || mech_types
                    .iter()
                    .any(|mech| mech.as_slice() == factory.mechanism_oid());
            if offered && factory.supports(context) {
                return Ok(factory.create());
            }
        }
        Err(SMBError::auth_error(
            NTStatus::StatusNotSupported,
            "no configured authenticator matches the server's mechanisms",
        ))
    }

    /// Inbound frame dispatch, invoked from the receiver task. Errors
    /// returned here are connection-fatal.
    fn handle(&self, frame: &[u8]) -> SMBResult<()> {
        let (_, message) = SMBMessage::parse_response(frame)?;
        let message_id = message.header.message_id;
        let outstanding = self.info.outstanding_requests();
        if !outstanding.is_outstanding(message_id) {
            return Err(SMBError::transport_error(format!(
                "received response with unknown sequence number {}",
                message_id
            )));
        }

        // [MS-SMB2] 3.2.5.1.4: apply granted credits first, so the waiter
        // observes a replenished window.
        self.info
            .sequence_window()
            .credits_granted(u32::from(message.header.credits));
        debug!(
            granted = message.header.credits,
            available = self.info.sequence_window().available(),
            "server granted credits"
        );

        let status = message.header.nt_status();

        // [MS-SMB2] 3.2.5.1.5: an interim async response does not complete
        // the request.
        if message.header.is_async() && status == NTStatus::StatusPending {
            debug!(
                message_id,
                async_id = message.header.async_id,
                "received interim async response"
            );
            outstanding.set_async_id(message_id, message.header.async_id);
            return Ok(());
        }

        // [MS-SMB2] 3.2.5.1.6
        if status == NTStatus::NetworkSessionExpired {
            if let Some(session) = self.info.session_table().find(message.header.session_id) {
                session.set_state(SessionState::Expired);
            }
            warn!(
                session_id = message.header.session_id,
                "server expired the session"
            );
            // TODO reauthenticate the expired session
            return Ok(());
        }

        if message.header.session_id != 0
            && message.header.command != SMBCommandCode::SessionSetup
        {
            let session = self
                .info
                .session_table()
                .find(message.header.session_id)
                .or_else(|| {
                    self.info
                        .preauth_session_table()
                        .find(message.header.session_id)
                });
            let Some(session) = session else {
                warn!(
                    session_id = message.header.session_id,
                    "no session matches the response, dropping"
                );
                return Ok(());
            };
            if message.header.is_signed() {
                if !session.signatory().verify(frame)? {
                    warn!(message_id, "invalid packet signature");
                    if self.config.signing_required() {
                        return Err(SMBError::transport_error(format!(
                            "signature verification failed for message {}",
                            message_id
                        )));
                    }
                    return Ok(());
                }
            } else if self.config.signing_required() {
                return Err(SMBError::transport_error(format!(
                    "signing is required but message {} was not signed",
                    message_id
                )));
            }
        }

        // [MS-SMB2] 3.2.5.1.8
        if let Some(request) = outstanding.received_response_for(message_id) {
            trace!(message_id, elapsed = ?request.elapsed(), "delivering response");
            request.deliver(Ok(message));
        }
        Ok(())
    }

    /// Connection-fatal error handling: every pending promise fails, then
    /// the connection is torn down (close-time errors are swallowed).
    async fn handle_error(&self, error: SMBError) {
        warn!(%error, "connection failed, aborting outstanding requests");
        self.info.outstanding_requests().handle_error(&error);
        if let Err(close_error) = self.close(true).await {
            debug!(%close_error, "error while closing connection after failure, ignoring");
        }
    }

    async fn logoff_session(&self, session: &Session) -> SMBResult<()> {
        let mut header = SMBHeader::new_request(SMBCommandCode::LogOff);
        header.session_id = session.id();
        let message = SMBMessage::new(header, SMBBody::LogoffRequest(SMBLogoffRequest::new()));
        let future = self.send(message, Some(session)).await?;
        future
            .await_response(self.config.transact_timeout())
            .await?;
        self.info.session_table().session_closed(session.id());
        self.bus.publish(SMBEvent::SessionLoggedOff {
            session_id: session.id(),
        });
        Ok(())
    }

    async fn close(&self, force: bool) -> SMBResult<()> {
        if self.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if !force {
            for session in self.info.session_table().active_sessions() {
                if let Err(error) = self.logoff_session(&session).await {
                    warn!(
                        session_id = session.id(),
                        %error,
                        "exception while closing session"
                    );
                }
            }
        }
        self.connected.store(false, Ordering::SeqCst);
        self.shutdown.cancel();
        let mut writer = self.writer.lock().await;
        if let Err(error) = writer.shutdown().await {
            debug!(%error, "transport shutdown error, ignoring");
        }
        info!(host = %self.remote_host, port = self.remote_port, "closed connection");
        self.bus.publish(SMBEvent::ConnectionClosed {
            host: self.remote_host.clone(),
            port: self.remote_port,
        });
        Ok(())
    }
}

fn session_setup_buffer(response: SMBMessage) -> SMBResult<Vec<u8>> {
    match response.body {
        SMBBody::SessionSetupResponse(body) => Ok(body.into_buffer()),
        _ => Err(SMBError::response_error(
            "expected a SESSION_SETUP response from the server",
        )),
    }
}

/// [MS-SMB2] 3.1.5.2: one credit per 64 KiB (or fraction thereof) of
/// payload.
pub(crate) fn credits_needed(max_payload_size: u32) -> u32 {
    max_payload_size.saturating_sub(1) / SINGLE_CREDIT_PAYLOAD_SIZE + 1
}

/// Scales the credit charge to the available window: multi-credit requests
/// are cut to a single credit when the server lacks LARGE_MTU, and a tight
/// window keeps one credit back for a small follow-up request.
pub(crate) fn granted_credits(needed: u32, available: u32, multi_credit: bool) -> u32 {
    if needed > 1 && !multi_credit {
        1
    } else if needed < available {
        needed
    } else if needed > 1 && available > 1 {
        available - 1
    } else {
        1
    }
}

/// CreditRequest: replenish the window toward the preferred minimum while
/// asking for at least as many credits as this request consumes.
pub(crate) fn credit_request(available: u32, granted: u32) -> u16 {
    let replenish = i64::from(PREFERRED_MINIMUM_CREDITS) - i64::from(available) - i64::from(granted);
    replenish.max(i64::from(granted)) as u16
}
