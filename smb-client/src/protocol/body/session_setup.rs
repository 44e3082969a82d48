use bitflags::bitflags;
use nom::bytes::complete::take;
use nom::combinator::{map, verify};
use nom::number::complete::{le_u16, le_u32, le_u64, le_u8};
use nom::sequence::tuple;
use nom::IResult;
use serde::{Deserialize, Serialize};

use crate::byte_helper::{u16_to_bytes, u32_to_bytes, u64_to_bytes};
use crate::protocol::body::{Capabilities, SecurityMode};
use crate::util::flags_helper::impl_serde_for_bitflags;

/// SESSION_SETUP request body ([MS-SMB2] 2.2.5). The buffer carries the
/// current GSS output token.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct SMBSessionSetupRequest {
    security_mode: SecurityMode,
    capabilities: Capabilities,
    previous_session_id: u64,
    buffer: Vec<u8>,
}

impl SMBSessionSetupRequest {
    pub fn new(security_mode: SecurityMode, buffer: Vec<u8>) -> Self {
        Self {
            security_mode,
            capabilities: Capabilities::empty(),
            previous_session_id: 0,
            buffer,
        }
    }

    pub fn security_mode(&self) -> SecurityMode {
        self.security_mode
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn parse(bytes: &[u8]) -> IResult<&[u8], Self> {
        let (remaining, (_, _, security_mode, capabilities, _, _, buffer_length, previous_session_id)) =
            tuple((
                verify(le_u16, |size| *size == 25),
                le_u8, // Flags
                map(le_u8, |bits| SecurityMode::from_bits_truncate(bits as u16)),
                map(le_u32, Capabilities::from_bits_truncate),
                le_u32, // Channel
                le_u16, // SecurityBufferOffset
                le_u16,
                le_u64,
            ))(bytes)?;
        let (remaining, buffer) = map(take(buffer_length as usize), <[u8]>::to_vec)(remaining)?;
        Ok((
            remaining,
            Self {
                security_mode,
                capabilities,
                previous_session_id,
                buffer,
            },
        ))
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        [
            &u16_to_bytes(25)[0..], // Structure Size
            &[0],                   // Flags
            &[self.security_mode.bits() as u8],
            &u32_to_bytes(self.capabilities.bits()),
            &u32_to_bytes(0),  // Channel
            &u16_to_bytes(88), // SecurityBufferOffset: 64-byte header + 24-byte fixed body
            &u16_to_bytes(self.buffer.len() as u16),
            &u64_to_bytes(self.previous_session_id),
            &self.buffer,
        ]
        .concat()
    }
}

/// SESSION_SETUP response body ([MS-SMB2] 2.2.6).
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct SMBSessionSetupResponse {
    session_flags: SMBSessionFlags,
    buffer: Vec<u8>,
}

impl SMBSessionSetupResponse {
    pub fn new(session_flags: SMBSessionFlags, buffer: Vec<u8>) -> Self {
        Self {
            session_flags,
            buffer,
        }
    }

    pub fn session_flags(&self) -> SMBSessionFlags {
        self.session_flags
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }

    pub fn parse(bytes: &[u8]) -> IResult<&[u8], Self> {
        let (remaining, (_, session_flags, _, buffer_length)) = tuple((
            verify(le_u16, |size| *size == 9),
            map(le_u16, SMBSessionFlags::from_bits_truncate),
            le_u16, // SecurityBufferOffset
            le_u16,
        ))(bytes)?;
        let (remaining, buffer) = map(take(buffer_length as usize), <[u8]>::to_vec)(remaining)?;
        Ok((
            remaining,
            Self {
                session_flags,
                buffer,
            },
        ))
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let security_offset: u16 = if self.buffer.is_empty() { 0 } else { 72 };
        [
            &u16_to_bytes(9)[0..], // Structure Size
            &u16_to_bytes(self.session_flags.bits()),
            &u16_to_bytes(security_offset),
            &u16_to_bytes(self.buffer.len() as u16),
            &self.buffer,
        ]
        .concat()
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct SMBSessionFlags: u16 {
        const IS_GUEST = 0x01;
        const IS_NULL = 0x02;
        const ENCRYPT_DATA = 0x04;
    }
}

impl_serde_for_bitflags! { SMBSessionFlags: u16 }
