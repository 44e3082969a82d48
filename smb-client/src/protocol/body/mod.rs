use serde::{Deserialize, Serialize};

use smb_client_core::nt_status::NTStatus;
use smb_client_core::SMBParseResult;

use crate::protocol::header::SMBCommandCode;
use crate::protocol::parse_failure;

pub mod capabilities;
pub mod dialect;
pub mod echo;
pub mod logoff;
pub mod negotiate;
pub mod security_mode;
pub mod session_setup;

pub use capabilities::Capabilities;
pub use dialect::SMBDialect;
pub use echo::{SMBEchoRequest, SMBEchoResponse};
pub use logoff::{SMBLogoffRequest, SMBLogoffResponse};
pub use negotiate::{SMBNegotiateRequest, SMBNegotiateResponse};
pub use security_mode::SecurityMode;
pub use session_setup::{SMBSessionFlags, SMBSessionSetupRequest, SMBSessionSetupResponse};

/// Body of an SMB2 message. Commands this engine does not interpret (and all
/// error-status responses, which carry the [MS-SMB2] 2.2.2 error body) pass
/// through as `Raw`.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub enum SMBBody {
    NegotiateRequest(SMBNegotiateRequest),
    NegotiateResponse(SMBNegotiateResponse),
    SessionSetupRequest(SMBSessionSetupRequest),
    SessionSetupResponse(SMBSessionSetupResponse),
    LogoffRequest(SMBLogoffRequest),
    LogoffResponse(SMBLogoffResponse),
    EchoRequest(SMBEchoRequest),
    EchoResponse(SMBEchoResponse),
    Raw(Vec<u8>),
}

impl SMBBody {
    pub fn as_bytes(&self) -> Vec<u8> {
        match self {
            SMBBody::NegotiateRequest(body) => body.as_bytes(),
            SMBBody::NegotiateResponse(body) => body.as_bytes(),
            SMBBody::SessionSetupRequest(body) => body.as_bytes(),
            SMBBody::SessionSetupResponse(body) => body.as_bytes(),
            SMBBody::LogoffRequest(body) => body.as_bytes(),
            SMBBody::LogoffResponse(body) => body.as_bytes(),
            SMBBody::EchoRequest(body) => body.as_bytes(),
            SMBBody::EchoResponse(body) => body.as_bytes(),
            SMBBody::Raw(bytes) => bytes.clone(),
        }
    }

    /// Decodes a body for `command`. `from_server` selects the response
    /// layout; `status` gates typed decoding, since anything that is neither
    /// success nor a continuation carries the error body instead.
    pub fn parse<'a>(
        bytes: &'a [u8],
        command: SMBCommandCode,
        from_server: bool,
        status: NTStatus,
    ) -> SMBParseResult<&'a [u8], SMBBody> {
        let typed_status = matches!(
            status,
            NTStatus::StatusSuccess | NTStatus::MoreProcessingRequired
        );
        if from_server && !typed_status {
            return Ok((&bytes[bytes.len()..], SMBBody::Raw(bytes.to_vec())));
        }
        let result = match (command, from_server) {
            (SMBCommandCode::Negotiate, false) => SMBNegotiateRequest::parse(bytes)
                .map(|(remaining, body)| (remaining, SMBBody::NegotiateRequest(body))),
            (SMBCommandCode::Negotiate, true) => SMBNegotiateResponse::parse(bytes)
                .map(|(remaining, body)| (remaining, SMBBody::NegotiateResponse(body))),
            (SMBCommandCode::SessionSetup, false) => SMBSessionSetupRequest::parse(bytes)
                .map(|(remaining, body)| (remaining, SMBBody::SessionSetupRequest(body))),
            (SMBCommandCode::SessionSetup, true) => SMBSessionSetupResponse::parse(bytes)
                .map(|(remaining, body)| (remaining, SMBBody::SessionSetupResponse(body))),
            (SMBCommandCode::LogOff, false) => SMBLogoffRequest::parse(bytes)
                .map(|(remaining, body)| (remaining, SMBBody::LogoffRequest(body))),
            (SMBCommandCode::LogOff, true) => SMBLogoffResponse::parse(bytes)
                .map(|(remaining, body)| (remaining, SMBBody::LogoffResponse(body))),
            (SMBCommandCode::Echo, false) => SMBEchoRequest::parse(bytes)
                .map(|(remaining, body)| (remaining, SMBBody::EchoRequest(body))),
            (SMBCommandCode::Echo, true) => SMBEchoResponse::parse(bytes)
                .map(|(remaining, body)| (remaining, SMBBody::EchoResponse(body))),
            _ => return Ok((&bytes[bytes.len()..], SMBBody::Raw(bytes.to_vec()))),
        };
        result.map_err(parse_failure)
    }
}
