use smb_client_core::SMBResult;

use crate::connection::Session;

pub mod ntlm;
pub mod spnego;

/// Credentials a caller authenticates with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    username: String,
    password: String,
    domain: String,
}

impl AuthContext {
    pub fn new<U: Into<String>, P: Into<String>, D: Into<String>>(
        username: U,
        password: P,
        domain: D,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            domain: domain.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }
}

/// One GSS mechanism mid-exchange. `authenticate` consumes the peer's token
/// and produces the next outgoing one; it installs the session key on the
/// session as soon as the mechanism has derived it.
pub trait Authenticator: Send {
    fn init(&mut self) -> SMBResult<()> {
        Ok(())
    }

    fn authenticate(
        &mut self,
        context: &AuthContext,
        input_token: &[u8],
        session: &Session,
    ) -> SMBResult<Vec<u8>>;
}

/// Factory registered in the config; selection is keyed on the DER-encoded
/// mechanism OID advertised by the server's NegTokenInit.
pub trait AuthenticatorFactory: Send + Sync {
    fn mechanism_oid(&self) -> &[u8];

    fn supports(&self, context: &AuthContext) -> bool;

    fn create(&self) -> Box<dyn Authenticator>;
}
