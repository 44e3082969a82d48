use std::sync::OnceLock;

use uuid::Uuid;

use smb_client_core::error::SMBError;
use smb_client_core::SMBResult;

use crate::connection::outstanding::OutstandingRequests;
use crate::connection::sequence_window::SequenceWindow;
use crate::connection::session::SessionTable;
use crate::protocol::body::{Capabilities, SMBDialect, SMBNegotiateResponse, SecurityMode};

/// Per-connection state shared between the send path, the receive task and
/// the authentication driver. The negotiated protocol is written exactly
/// once, at the end of dialect negotiation, and read-only afterwards.
#[derive(Debug)]
pub struct ConnectionInfo {
    client_guid: Uuid,
    negotiated: OnceLock<NegotiatedProtocol>,
    sequence_window: SequenceWindow,
    outstanding_requests: OutstandingRequests,
    session_table: SessionTable,
    preauth_session_table: SessionTable,
}

impl ConnectionInfo {
    pub fn new(client_guid: Uuid) -> Self {
        Self {
            client_guid,
            negotiated: OnceLock::new(),
            sequence_window: SequenceWindow::new(),
            outstanding_requests: OutstandingRequests::new(),
            session_table: SessionTable::new(),
            preauth_session_table: SessionTable::new(),
        }
    }

    pub fn client_guid(&self) -> Uuid {
        self.client_guid
    }

    pub fn sequence_window(&self) -> &SequenceWindow {
        &self.sequence_window
    }

    pub fn outstanding_requests(&self) -> &OutstandingRequests {
        &self.outstanding_requests
    }

    pub fn session_table(&self) -> &SessionTable {
        &self.session_table
    }

    pub fn preauth_session_table(&self) -> &SessionTable {
        &self.preauth_session_table
    }

    pub fn negotiated(&self) -> Option<&NegotiatedProtocol> {
        self.negotiated.get()
    }

    pub(crate) fn record_negotiation(&self, protocol: NegotiatedProtocol) -> SMBResult<()> {
        self.negotiated
            .set(protocol)
            .map_err(|_| SMBError::precondition_failed("dialect already negotiated"))
    }

    pub fn supports(&self, capability: Capabilities) -> bool {
        self.negotiated()
            .map(|protocol| protocol.capabilities().contains(capability))
            .unwrap_or(false)
    }

    pub fn server_requires_signing(&self) -> bool {
        self.negotiated()
            .map(NegotiatedProtocol::server_requires_signing)
            .unwrap_or(false)
    }
}

/// What dialect negotiation settled on ([MS-SMB2] 3.2.5.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedProtocol {
    dialect: SMBDialect,
    server_guid: Uuid,
    capabilities: Capabilities,
    max_transact_size: u32,
    max_read_size: u32,
    max_write_size: u32,
    server_security_mode: SecurityMode,
    gss_negotiate_token: Vec<u8>,
}

impl NegotiatedProtocol {
    pub fn from_response(response: &SMBNegotiateResponse) -> Self {
        Self {
            dialect: response.dialect(),
            server_guid: response.server_guid(),
            capabilities: response.capabilities(),
            max_transact_size: response.max_transact_size(),
            max_read_size: response.max_read_size(),
            max_write_size: response.max_write_size(),
            server_security_mode: response.security_mode(),
            gss_negotiate_token: response.buffer().to_vec(),
        }
    }

    pub fn dialect(&self) -> SMBDialect {
        self.dialect
    }

    pub fn server_guid(&self) -> Uuid {
        self.server_guid
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn max_transact_size(&self) -> u32 {
        self.max_transact_size
    }

    pub fn max_read_size(&self) -> u32 {
        self.max_read_size
    }

    pub fn max_write_size(&self) -> u32 {
        self.max_write_size
    }

    pub fn server_security_mode(&self) -> SecurityMode {
        self.server_security_mode
    }

    pub fn server_requires_signing(&self) -> bool {
        self.server_security_mode
            .contains(SecurityMode::NEGOTIATE_SIGNING_REQUIRED)
    }

    pub fn gss_negotiate_token(&self) -> &[u8] {
        &self.gss_negotiate_token
    }
}
