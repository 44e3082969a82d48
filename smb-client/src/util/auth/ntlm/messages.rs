use bitflags::bitflags;

use smb_client_core::error::SMBError;
use smb_client_core::SMBResult;

use crate::byte_helper::{bytes_to_u16, bytes_to_u32, u16_to_bytes, u32_to_bytes};
use crate::util::crypto::ntlm::utf16le;

pub const NTLM_SIGNATURE: &[u8; 8] = b"NTLMSSP\0";

/// AvId of the timestamp pair in the challenge's target info.
const AV_ID_TIMESTAMP: u16 = 0x0007;
const AV_ID_EOL: u16 = 0x0000;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct NTLMNegotiateFlags: u32 {
        const UNICODE_ENCODING = 0x01;
        const OEM_ENCODING = 0x02;
        const REQUEST_TARGET = 0x04;
        const SIGN = 0x10;
        const SEAL = 0x20;
        const DATAGRAM = 0x40;
        const LAN_MANAGER_SESSION_KEY = 0x80;
        const NTLM_SESSION_SECURITY = 0x200;
        const ANONYMOUS = 0x800;
        const DOMAIN_NAME_SUPPLIED = 0x1000;
        const WORKSTATION_NAME_SUPPLIED = 0x2000;
        const ALWAYS_SIGN = 0x8000;
        const TARGET_TYPE_DOMAIN = 0x10000;
        const TARGET_TYPE_SERVER = 0x20000;
        const EXTENDED_SESSION_SECURITY = 0x80000;
        const IDENTIFY = 0x100000;
        const REQUEST_NON_NT_SESSION_KEY = 0x400000;
        const TARGET_INFO = 0x800000;
        const VERSION = 0x2000000;
        const USE_128_BIT_ENCRYPTION = 0x20000000;
        const KEY_EXCHANGE = 0x40000000;
        const USE_56_BIT_ENCRYPTION = 0x80000000;
    }
}

/// NEGOTIATE (type 1) message ([MS-NLMP] 2.2.1.1). Domain and workstation are
/// left absent, as clients that negotiate UNICODE do.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct NTLMNegotiateMessage {
    negotiate_flags: NTLMNegotiateFlags,
}

impl NTLMNegotiateMessage {
    pub fn new(negotiate_flags: NTLMNegotiateFlags) -> Self {
        Self { negotiate_flags }
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        [
            &NTLM_SIGNATURE[0..],
            &u32_to_bytes(0x01),
            &u32_to_bytes(self.negotiate_flags.bits()),
            &u16_to_bytes(0), // DomainNameFields
            &u16_to_bytes(0),
            &u32_to_bytes(32),
            &u16_to_bytes(0), // WorkstationFields
            &u16_to_bytes(0),
            &u32_to_bytes(32),
        ]
        .concat()
    }
}

/// CHALLENGE (type 2) message ([MS-NLMP] 2.2.1.2), as read off the wire.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct NTLMChallengeMessage {
    target_name: Vec<u8>,
    negotiate_flags: NTLMNegotiateFlags,
    server_challenge: [u8; 8],
    target_info: Vec<u8>,
}

impl NTLMChallengeMessage {
    pub fn parse(bytes: &[u8]) -> SMBResult<Self> {
        if bytes.len() < 48 {
            return Err(SMBError::PayloadTooSmall(bytes.len()));
        }
        if &bytes[0..8] != NTLM_SIGNATURE {
            return Err(SMBError::parse_error("missing NTLMSSP signature"));
        }
        if bytes_to_u32(&bytes[8..12]) != 0x02 {
            return Err(SMBError::parse_error("not an NTLM CHALLENGE message"));
        }
        let target_name = read_payload_field(bytes, 12)?;
        let negotiate_flags = NTLMNegotiateFlags::from_bits_truncate(bytes_to_u32(&bytes[20..24]));
        let server_challenge = bytes[24..32]
            .try_into()
            .map_err(|_| SMBError::parse_error("truncated server challenge"))?;
        let target_info = read_payload_field(bytes, 40)?;
        Ok(Self {
            target_name,
            negotiate_flags,
            server_challenge,
            target_info,
        })
    }

    pub fn negotiate_flags(&self) -> NTLMNegotiateFlags {
        self.negotiate_flags
    }

    pub fn server_challenge(&self) -> &[u8; 8] {
        &self.server_challenge
    }

    pub fn target_name(&self) -> &[u8] {
        &self.target_name
    }

    pub fn target_info(&self) -> &[u8] {
        &self.target_info
    }

    /// Timestamp AvPair from the target info, when the server sent one.
    pub fn target_timestamp(&self) -> Option<u64> {
        let mut rest = self.target_info.as_slice();
        while rest.len() >= 4 {
            let id = bytes_to_u16(&rest[0..2]);
            let len = bytes_to_u16(&rest[2..4]) as usize;
            rest = &rest[4..];
            if rest.len() < len {
                return None;
            }
            if id == AV_ID_TIMESTAMP && len == 8 {
                return Some(crate::byte_helper::bytes_to_u64(&rest[..8]));
            }
            if id == AV_ID_EOL {
                return None;
            }
            rest = &rest[len..];
        }
        None
    }
}

/// AUTHENTICATE (type 3) message ([MS-NLMP] 2.2.1.3), without the optional
/// version and MIC fields.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct NTLMAuthenticateMessage {
    lm_response: Vec<u8>,
    nt_response: Vec<u8>,
    domain: String,
    user: String,
    workstation: String,
    encrypted_session_key: Vec<u8>,
    negotiate_flags: NTLMNegotiateFlags,
}

impl NTLMAuthenticateMessage {
    pub fn new(
        domain: String,
        user: String,
        nt_response: Vec<u8>,
        encrypted_session_key: Vec<u8>,
        negotiate_flags: NTLMNegotiateFlags,
    ) -> Self {
        Self {
            lm_response: Vec::new(),
            nt_response,
            domain,
            user,
            workstation: String::new(),
            encrypted_session_key,
            negotiate_flags,
        }
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        const FIXED_SIZE: u32 = 64;
        let domain = utf16le(&self.domain);
        let user = utf16le(&self.user);
        let workstation = utf16le(&self.workstation);

        let mut offset = FIXED_SIZE;
        let mut payload_field = |data: &[u8]| {
            let field = [
                &u16_to_bytes(data.len() as u16)[0..],
                &u16_to_bytes(data.len() as u16),
                &u32_to_bytes(offset),
            ]
            .concat();
            offset += data.len() as u32;
            field
        };

        // Payload order: domain, user, workstation, LM, NT, session key.
        let domain_fields = payload_field(&domain);
        let user_fields = payload_field(&user);
        let workstation_fields = payload_field(&workstation);
        let lm_fields = payload_field(&self.lm_response);
        let nt_fields = payload_field(&self.nt_response);
        let key_fields = payload_field(&self.encrypted_session_key);

        [
            &NTLM_SIGNATURE[0..],
            &u32_to_bytes(0x03),
            &lm_fields,
            &nt_fields,
            &domain_fields,
            &user_fields,
            &workstation_fields,
            &key_fields,
            &u32_to_bytes(self.negotiate_flags.bits()),
            &domain,
            &user,
            &workstation,
            &self.lm_response,
            &self.nt_response,
            &self.encrypted_session_key,
        ]
        .concat()
    }
}

fn read_payload_field(bytes: &[u8], at: usize) -> SMBResult<Vec<u8>> {
    let len = bytes_to_u16(&bytes[at..at + 2]) as usize;
    let offset = bytes_to_u32(&bytes[at + 4..at + 8]) as usize;
    if len == 0 {
        return Ok(Vec::new());
    }
    bytes
        .get(offset..offset + len)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| SMBError::parse_error("NTLM payload field out of bounds"))
}

#[cfg(test)]
mod tests {
    use crate::byte_helper::u64_to_bytes;

    use super::*;

    fn challenge_bytes(target_info: &[u8]) -> Vec<u8> {
        [
            &NTLM_SIGNATURE[0..],
            &u32_to_bytes(0x02),
            &u16_to_bytes(0), // TargetNameFields
            &u16_to_bytes(0),
            &u32_to_bytes(48),
            &u32_to_bytes(
                (NTLMNegotiateFlags::UNICODE_ENCODING | NTLMNegotiateFlags::KEY_EXCHANGE).bits(),
            ),
            &[1, 2, 3, 4, 5, 6, 7, 8], // ServerChallenge
            &[0; 8],                   // Reserved
            &u16_to_bytes(target_info.len() as u16),
            &u16_to_bytes(target_info.len() as u16),
            &u32_to_bytes(48),
            target_info,
        ]
        .concat()
    }

    #[test]
    fn parses_challenge_fields() {
        let target_info = [
            &u16_to_bytes(0x0002)[0..], // MsvAvNbDomainName
            &u16_to_bytes(2),
            &[0x41, 0x00],
            &u16_to_bytes(AV_ID_EOL),
            &u16_to_bytes(0),
        ]
        .concat();
        let challenge = NTLMChallengeMessage::parse(&challenge_bytes(&target_info)).unwrap();
        assert_eq!(challenge.server_challenge(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(challenge
            .negotiate_flags()
            .contains(NTLMNegotiateFlags::KEY_EXCHANGE));
        assert_eq!(challenge.target_info(), target_info.as_slice());
        assert_eq!(challenge.target_timestamp(), None);
    }

    #[test]
    fn extracts_timestamp_av_pair() {
        let target_info = [
            &u16_to_bytes(AV_ID_TIMESTAMP)[0..],
            &u16_to_bytes(8),
            &u64_to_bytes(0x01D1_AB00_0000_0000),
            &u16_to_bytes(AV_ID_EOL),
            &u16_to_bytes(0),
        ]
        .concat();
        let challenge = NTLMChallengeMessage::parse(&challenge_bytes(&target_info)).unwrap();
        assert_eq!(challenge.target_timestamp(), Some(0x01D1_AB00_0000_0000));
    }

    #[test]
    fn rejects_non_challenge_messages() {
        let negotiate = NTLMNegotiateMessage::new(NTLMNegotiateFlags::UNICODE_ENCODING);
        assert!(matches!(
            NTLMChallengeMessage::parse(&negotiate.as_bytes()),
            Err(SMBError::ParseError(_))
        ));
    }

    #[test]
    fn authenticate_payload_offsets_are_consistent() {
        let message = NTLMAuthenticateMessage::new(
            "DOMAIN".into(),
            "user".into(),
            vec![0xBB; 40],
            vec![0xCC; 16],
            NTLMNegotiateFlags::UNICODE_ENCODING | NTLMNegotiateFlags::KEY_EXCHANGE,
        );
        let bytes = message.as_bytes();
        assert_eq!(&bytes[0..8], NTLM_SIGNATURE);
        assert_eq!(bytes_to_u32(&bytes[8..12]), 3);

        // Domain field descriptor at offset 28: length 12, payload at 64.
        assert_eq!(bytes_to_u16(&bytes[28..30]), 12);
        let domain_offset = bytes_to_u32(&bytes[32..36]) as usize;
        assert_eq!(domain_offset, 64);
        assert_eq!(&bytes[domain_offset..domain_offset + 2], &[b'D', 0]);

        // NT response descriptor at offset 20 points past domain, user and
        // workstation strings.
        let nt_offset = bytes_to_u32(&bytes[24..28]) as usize;
        let nt_len = bytes_to_u16(&bytes[20..22]) as usize;
        assert_eq!(nt_len, 40);
        assert_eq!(&bytes[nt_offset..nt_offset + nt_len], &[0xBB; 40][..]);

        let total: usize = 64 + 12 + 8 + 0 + 0 + 40 + 16;
        assert_eq!(bytes.len(), total);
    }
}
