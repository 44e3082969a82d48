use serde::{Deserialize, Serialize};

use smb_client_core::SMBParseResult;

use crate::protocol::body::SMBBody;
use crate::protocol::header::SMBHeader;
use crate::protocol::parse_failure;

/// Anything that can be put on the wire behind the transport's length prefix.
pub trait Message {
    fn as_bytes(&self) -> Vec<u8>;
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct SMBMessage {
    pub header: SMBHeader,
    pub body: SMBBody,
    max_payload_size: Option<u32>,
}

impl SMBMessage {
    pub fn new(header: SMBHeader, body: SMBBody) -> Self {
        SMBMessage {
            header,
            body,
            max_payload_size: None,
        }
    }

    /// Overrides the payload size used for credit accounting. Requests whose
    /// dominant payload is not the serialized body (READ responses, WRITE
    /// data) must declare it here.
    pub fn with_max_payload_size(mut self, max_payload_size: u32) -> Self {
        self.max_payload_size = Some(max_payload_size);
        self
    }

    pub fn max_payload_size(&self) -> u32 {
        self.max_payload_size
            .unwrap_or_else(|| self.body.as_bytes().len() as u32)
    }

    pub fn parse_response(bytes: &[u8]) -> SMBParseResult<&[u8], Self> {
        Self::parse(bytes, true)
    }

    pub fn parse_request(bytes: &[u8]) -> SMBParseResult<&[u8], Self> {
        Self::parse(bytes, false)
    }

    fn parse(bytes: &[u8], from_server: bool) -> SMBParseResult<&[u8], Self> {
        let (remaining, header) = SMBHeader::parse(bytes).map_err(parse_failure)?;
        let (remaining, body) =
            SMBBody::parse(remaining, header.command, from_server, header.nt_status())?;
        Ok((remaining, Self::new(header, body)))
    }
}

impl Message for SMBMessage {
    fn as_bytes(&self) -> Vec<u8> {
        [self.header.as_bytes(), self.body.as_bytes()].concat()
    }
}
