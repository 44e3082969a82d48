use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use smb_client_core::error::SMBError;
use smb_client_core::SMBResult;

use crate::protocol::body::SMBDialect;
use crate::protocol::header::SIGNATURE_RANGE;
use crate::util::crypto::signing;

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum SessionState {
    InProgress,
    Valid,
    Expired,
}

/// An authenticated (or authenticating) session. The id is assigned by the
/// server on the first SESSION_SETUP response; the signing key arrives from
/// the authenticator mid-exchange.
#[derive(Debug)]
pub struct Session {
    session_id: AtomicU64,
    signing_required: bool,
    state: Mutex<SessionState>,
    signatory: PacketSignatory,
}

impl Session {
    pub fn new(session_id: u64, signing_required: bool, dialect: SMBDialect) -> Self {
        Self {
            session_id: AtomicU64::new(session_id),
            signing_required,
            state: Mutex::new(SessionState::InProgress),
            signatory: PacketSignatory::new(dialect),
        }
    }

    pub fn id(&self) -> u64 {
        self.session_id.load(Ordering::SeqCst)
    }

    pub(crate) fn set_id(&self, session_id: u64) {
        self.session_id.store(session_id, Ordering::SeqCst);
    }

    pub fn signing_required(&self) -> bool {
        self.signing_required
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
    }

    /// Installs the GSS session key, deriving the dialect's signing key from
    /// it.
    pub fn set_session_key(&self, session_key: &[u8]) -> SMBResult<()> {
        let signing_key = signing::generate_signing_key(session_key, self.signatory.dialect)?;
        self.signatory.init(signing_key);
        Ok(())
    }

    pub fn signatory(&self) -> &PacketSignatory {
        &self.signatory
    }
}

/// Signs and verifies serialized frames with the session's signing key. The
/// signature field is zeroed for the computation per [MS-SMB2] 3.1.4.1.
#[derive(Debug)]
pub struct PacketSignatory {
    dialect: SMBDialect,
    signing_key: RwLock<Option<Vec<u8>>>,
}

impl PacketSignatory {
    fn new(dialect: SMBDialect) -> Self {
        Self {
            dialect,
            signing_key: RwLock::new(None),
        }
    }

    pub fn ready(&self) -> bool {
        self.signing_key.read().is_some()
    }

    pub(crate) fn init(&self, signing_key: Vec<u8>) {
        *self.signing_key.write() = Some(signing_key);
    }

    /// Splices the signature into an already-serialized message.
    pub fn sign(&self, message: &mut [u8]) -> SMBResult<()> {
        let key = self
            .signing_key
            .read()
            .clone()
            .ok_or_else(|| SMBError::precondition_failed("no signing key established"))?;
        if message.len() < SIGNATURE_RANGE.end {
            return Err(SMBError::PayloadTooSmall(message.len()));
        }
        message[SIGNATURE_RANGE].fill(0);
        let signature = signing::calculate_signature(&key, self.dialect, message)?;
        message[SIGNATURE_RANGE].copy_from_slice(&signature);
        Ok(())
    }

    /// Recomputes the signature of an inbound frame and compares it to the
    /// presented one. Verification without a key fails closed.
    pub fn verify(&self, message: &[u8]) -> SMBResult<bool> {
        let Some(key) = self.signing_key.read().clone() else {
            return Ok(false);
        };
        if message.len() < SIGNATURE_RANGE.end {
            return Err(SMBError::PayloadTooSmall(message.len()));
        }
        let mut scratch = message.to_vec();
        let mut presented = [0u8; 16];
        presented.copy_from_slice(&scratch[SIGNATURE_RANGE]);
        scratch[SIGNATURE_RANGE].fill(0);
        let expected = signing::calculate_signature(&key, self.dialect, &scratch)?;
        Ok(expected == presented)
    }
}

/// Concurrent session registry, keyed by the server-assigned 64-bit id. Used
/// both for the authenticated table and the preauth table.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: RwLock<HashMap<u64, Arc<Session>>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_session(&self, session_id: u64, session: Arc<Session>) {
        self.sessions.write().insert(session_id, session);
    }

    pub fn find(&self, session_id: u64) -> Option<Arc<Session>> {
        self.sessions.read().get(&session_id).cloned()
    }

    pub fn session_closed(&self, session_id: u64) -> Option<Arc<Session>> {
        self.sessions.write().remove(&session_id)
    }

    pub fn active_sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.read().values().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
