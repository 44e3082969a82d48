use nom::bytes::complete::take;
use nom::combinator::{map, map_res, verify};
use nom::multi::count;
use nom::number::complete::{le_u16, le_u32, le_u64};
use nom::sequence::tuple;
use nom::IResult;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::byte_helper::{u16_to_bytes, u32_to_bytes, u64_to_bytes};
use crate::protocol::body::{Capabilities, SMBDialect, SecurityMode};

/// NEGOTIATE request body ([MS-SMB2] 2.2.3).
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct SMBNegotiateRequest {
    security_mode: SecurityMode,
    capabilities: Capabilities,
    client_guid: Uuid,
    dialects: Vec<SMBDialect>,
}

impl SMBNegotiateRequest {
    pub fn new(dialects: Vec<SMBDialect>, client_guid: Uuid, signing_required: bool) -> Self {
        Self {
            security_mode: SecurityMode::for_client(signing_required),
            capabilities: Capabilities::LARGE_MTU,
            client_guid,
            dialects,
        }
    }

    pub fn dialects(&self) -> &[SMBDialect] {
        &self.dialects
    }

    pub fn client_guid(&self) -> Uuid {
        self.client_guid
    }

    pub fn security_mode(&self) -> SecurityMode {
        self.security_mode
    }

    pub fn parse(bytes: &[u8]) -> IResult<&[u8], Self> {
        let (remaining, (_, dialect_count, security_mode, _, capabilities, client_guid, _)) =
            tuple((
                verify(le_u16, |size| *size == 36),
                le_u16,
                map(le_u16, SecurityMode::from_bits_truncate),
                take(2_usize),
                map(le_u32, Capabilities::from_bits_truncate),
                map_res(take(16_usize), Uuid::from_slice),
                take(8_usize), // ClientStartTime
            ))(bytes)?;
        let (remaining, dialects) = count(
            map_res(le_u16, SMBDialect::try_from),
            dialect_count as usize,
        )(remaining)?;
        Ok((
            remaining,
            Self {
                security_mode,
                capabilities,
                client_guid,
                dialects,
            },
        ))
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let dialect_bytes = self
            .dialects
            .iter()
            .flat_map(|dialect| u16_to_bytes(*dialect as u16))
            .collect::<Vec<u8>>();
        [
            &u16_to_bytes(36)[0..], // Structure Size
            &u16_to_bytes(self.dialects.len() as u16),
            &u16_to_bytes(self.security_mode.bits()),
            &[0, 0], // Reserved
            &u32_to_bytes(self.capabilities.bits()),
            self.client_guid.as_bytes(),
            &[0; 8], // ClientStartTime
            &dialect_bytes,
        ]
        .concat()
    }
}

/// NEGOTIATE response body ([MS-SMB2] 2.2.4). The buffer holds the server's
/// initial GSS negotiate token and may be empty.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct SMBNegotiateResponse {
    security_mode: SecurityMode,
    dialect: SMBDialect,
    server_guid: Uuid,
    capabilities: Capabilities,
    max_transact_size: u32,
    max_read_size: u32,
    max_write_size: u32,
    system_time: u64,
    server_start_time: u64,
    buffer: Vec<u8>,
}

impl SMBNegotiateResponse {
    pub fn new(
        security_mode: SecurityMode,
        dialect: SMBDialect,
        server_guid: Uuid,
        capabilities: Capabilities,
        max_transact_size: u32,
        max_read_size: u32,
        max_write_size: u32,
        buffer: Vec<u8>,
    ) -> Self {
        Self {
            security_mode,
            dialect,
            server_guid,
            capabilities,
            max_transact_size,
            max_read_size,
            max_write_size,
            system_time: 0,
            server_start_time: 0,
            buffer,
        }
    }

    pub fn security_mode(&self) -> SecurityMode {
        self.security_mode
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

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn parse(bytes: &[u8]) -> IResult<&[u8], Self> {
        let (
            remaining,
            (
                _,
                security_mode,
                dialect,
                _,
                server_guid,
                capabilities,
                max_transact_size,
                max_read_size,
                max_write_size,
                system_time,
                server_start_time,
                _,
                buffer_length,
                _,
            ),
        ) = tuple((
            verify(le_u16, |size| *size == 65),
            map(le_u16, SecurityMode::from_bits_truncate),
            map_res(le_u16, SMBDialect::try_from),
            le_u16, // NegotiateContextCount
            map_res(take(16_usize), Uuid::from_slice),
            map(le_u32, Capabilities::from_bits_truncate),
            le_u32,
            le_u32,
            le_u32,
            le_u64,
            le_u64,
            le_u16, // SecurityBufferOffset
            le_u16,
            le_u32, // NegotiateContextOffset
        ))(bytes)?;
        let (remaining, buffer) = map(take(buffer_length as usize), <[u8]>::to_vec)(remaining)?;
        Ok((
            remaining,
            Self {
                security_mode,
                dialect,
                server_guid,
                capabilities,
                max_transact_size,
                max_read_size,
                max_write_size,
                system_time,
                server_start_time,
                buffer,
            },
        ))
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        // Offset counted from the start of the SMB2 header: 64-byte header
        // plus the 64-byte fixed response.
        let security_offset: u16 = if self.buffer.is_empty() { 0 } else { 128 };
        [
            &u16_to_bytes(65)[0..], // Structure Size
            &u16_to_bytes(self.security_mode.bits()),
            &u16_to_bytes(self.dialect as u16),
            &u16_to_bytes(0), // NegotiateContextCount
            self.server_guid.as_bytes(),
            &u32_to_bytes(self.capabilities.bits()),
            &u32_to_bytes(self.max_transact_size),
            &u32_to_bytes(self.max_read_size),
            &u32_to_bytes(self.max_write_size),
            &u64_to_bytes(self.system_time),
            &u64_to_bytes(self.server_start_time),
            &u16_to_bytes(security_offset),
            &u16_to_bytes(self.buffer.len() as u16),
            &u32_to_bytes(0), // NegotiateContextOffset
            &self.buffer,
        ]
        .concat()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trip() {
        let request = SMBNegotiateRequest::new(SMBDialect::client_defaults(), Uuid::new_v4(), true);
        let bytes = request.as_bytes();
        assert_eq!(bytes.len(), 36 + 2 * request.dialects().len());

        let (remaining, parsed) = SMBNegotiateRequest::parse(&bytes).unwrap();
        assert!(remaining.is_empty());
        assert_eq!(parsed, request);
        assert!(parsed
            .security_mode()
            .contains(SecurityMode::NEGOTIATE_SIGNING_REQUIRED));
    }

    #[test]
    fn response_round_trip_with_token() {
        let response = SMBNegotiateResponse::new(
            SecurityMode::NEGOTIATE_SIGNING_ENABLED,
            SMBDialect::V3_0_0,
            Uuid::new_v4(),
            Capabilities::LARGE_MTU,
            0x800000,
            0x800000,
            0x800000,
            vec![0x60, 0x06, 0x06, 0x01, 0x02, 0x03],
        );
        let (_, parsed) = SMBNegotiateResponse::parse(&response.as_bytes()).unwrap();
        assert_eq!(parsed, response);
        assert_eq!(parsed.buffer().len(), 6);
    }
}
