use nom::bytes::complete::{tag, take};
use nom::combinator::{map, map_res, verify};
use nom::number::complete::{le_u16, le_u32, le_u64};
use nom::sequence::tuple;
use nom::IResult;
use serde::{Deserialize, Serialize};

use smb_client_core::nt_status::NTStatus;

use crate::byte_helper::{u16_to_bytes, u32_to_bytes, u64_to_bytes};

pub mod command;
pub mod flags;

pub use command::SMBCommandCode;
pub use flags::SMBFlags;

pub const SMB2_PROTOCOL_ID: [u8; 4] = [0xFE, b'S', b'M', b'B'];
pub const SMB2_HEADER_SIZE: usize = 64;

/// Byte range of the signature field within a serialized message, used when
/// splicing a computed signature into an already-encoded frame.
pub const SIGNATURE_RANGE: std::ops::Range<usize> = 48..64;

/// The 64-byte SMB2 message header ([MS-SMB2] 2.2.1).
///
/// Bytes 32..40 are the AsyncId when `SMB2_FLAGS_ASYNC_COMMAND` is set and
/// Reserved + TreeId otherwise; `async_id` and `tree_id` mirror that split.
/// `credits` carries CreditRequest on requests and CreditResponse on
/// responses.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct SMBHeader {
    pub credit_charge: u16,
    pub status: u32,
    pub command: SMBCommandCode,
    pub credits: u16,
    pub flags: SMBFlags,
    pub next_command: u32,
    pub message_id: u64,
    pub tree_id: u32,
    pub async_id: u64,
    pub session_id: u64,
    pub signature: [u8; 16],
}

impl SMBHeader {
    pub fn new_request(command: SMBCommandCode) -> Self {
        Self {
            credit_charge: 0,
            status: 0,
            command,
            credits: 0,
            flags: SMBFlags::empty(),
            next_command: 0,
            message_id: 0,
            tree_id: 0,
            async_id: 0,
            session_id: 0,
            signature: [0; 16],
        }
    }

    pub fn nt_status(&self) -> NTStatus {
        NTStatus::from_code(self.status)
    }

    pub fn is_async(&self) -> bool {
        self.flags.contains(SMBFlags::ASYNC_COMMAND)
    }

    pub fn is_signed(&self) -> bool {
        self.flags.contains(SMBFlags::SIGNED)
    }

    pub fn parse(bytes: &[u8]) -> IResult<&[u8], Self> {
        let (
            remaining,
            (_, _, credit_charge, status, command, credits, flags, next_command, message_id),
        ) = tuple((
            tag(&SMB2_PROTOCOL_ID[..]),
            verify(le_u16, |size| *size as usize == SMB2_HEADER_SIZE),
            le_u16,
            le_u32,
            map_res(le_u16, SMBCommandCode::try_from),
            le_u16,
            map(le_u32, SMBFlags::from_bits_truncate),
            le_u32,
            le_u64,
        ))(bytes)?;
        let (remaining, (async_id, tree_id)) = if flags.contains(SMBFlags::ASYNC_COMMAND) {
            map(le_u64, |async_id| (async_id, 0))(remaining)?
        } else {
            map(tuple((le_u32, le_u32)), |(_, tree_id)| (0, tree_id))(remaining)?
        };
        let (remaining, (session_id, signature)) = tuple((le_u64, take(16_usize)))(remaining)?;
        let mut signature_bytes = [0u8; 16];
        signature_bytes.copy_from_slice(signature);
        Ok((
            remaining,
            Self {
                credit_charge,
                status,
                command,
                credits,
                flags,
                next_command,
                message_id,
                tree_id,
                async_id,
                session_id,
                signature: signature_bytes,
            },
        ))
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let id_section = if self.is_async() {
            u64_to_bytes(self.async_id)
        } else {
            let mut section = [0u8; 8];
            section[4..].copy_from_slice(&u32_to_bytes(self.tree_id));
            section
        };
        [
            &SMB2_PROTOCOL_ID[..],
            &u16_to_bytes(SMB2_HEADER_SIZE as u16),
            &u16_to_bytes(self.credit_charge),
            &u32_to_bytes(self.status),
            &u16_to_bytes(self.command.into()),
            &u16_to_bytes(self.credits),
            &u32_to_bytes(self.flags.bits()),
            &u32_to_bytes(self.next_command),
            &u64_to_bytes(self.message_id),
            &id_section,
            &u64_to_bytes(self.session_id),
            &self.signature,
        ]
        .concat()
    }
}
