//! NTLMv2 client-side computations ([MS-NLMP] 3.3.2).

use std::time::{SystemTime, UNIX_EPOCH};

use digest::Digest;
use hmac::{Hmac, Mac};
use md4::Md4;
use md5::Md5;

use smb_client_core::error::SMBError;
use smb_client_core::SMBResult;

use crate::byte_helper::u64_to_bytes;

/// NTOWFv2: HMAC-MD5 over UPPER(user) + domain in UTF-16LE, keyed with the
/// MD4 of the UTF-16LE password.
pub fn ntowf_v2(password: &str, user: &str, domain: &str) -> SMBResult<Vec<u8>> {
    let password_hash = Md4::digest(utf16le(password));
    let text = user.to_uppercase() + domain;
    let mut hmac_md5 = new_hmac_from_slice(password_hash.as_slice())?;
    hmac_md5.update(&utf16le(&text));
    Ok(hmac_md5.finalize().into_bytes().to_vec())
}

/// NTProofStr: HMAC-MD5 of the server challenge and the client's temp blob,
/// keyed with NTOWFv2. The full NTLMv2 response is the proof followed by the
/// blob.
pub fn nt_proof(response_key: &[u8], server_challenge: &[u8], temp: &[u8]) -> SMBResult<Vec<u8>> {
    let hmac = new_hmac_from_slice(response_key)?
        .chain_update(server_challenge)
        .chain_update(temp);
    Ok(hmac.finalize().into_bytes().to_vec())
}

/// SessionBaseKey: HMAC-MD5 of the NTProofStr, keyed with NTOWFv2.
pub fn session_base_key(response_key: &[u8], nt_proof: &[u8]) -> SMBResult<Vec<u8>> {
    let hmac = new_hmac_from_slice(response_key)?.chain_update(nt_proof);
    Ok(hmac.finalize().into_bytes().to_vec())
}

/// The `temp` structure of the NTLMv2 response ([MS-NLMP] 2.2.2.7):
/// version bytes, timestamp, client challenge and the server's target info.
pub fn build_v2_temp(timestamp: u64, client_challenge: &[u8; 8], target_info: &[u8]) -> Vec<u8> {
    [
        &[1, 1][0..], // Responserversion, HiResponserversion
        &[0; 6],
        &u64_to_bytes(timestamp),
        client_challenge,
        &[0; 4],
        target_info,
        &[0; 4],
    ]
    .concat()
}

/// Current time as a Windows FILETIME (100 ns ticks since 1601-01-01).
pub fn current_filetime() -> u64 {
    const EPOCH_DELTA_SECS: u64 = 11_644_473_600;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (EPOCH_DELTA_SECS + now.as_secs()) * 10_000_000 + u64::from(now.subsec_nanos()) / 100
}

pub(crate) fn utf16le(value: &str) -> Vec<u8> {
    value.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

fn new_hmac_from_slice(slice: &[u8]) -> SMBResult<Hmac<Md5>> {
    <Hmac<Md5>>::new_from_slice(slice)
        .map_err(|_| SMBError::crypto_error("Invalid length for key"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ntowf_v2_reference_vector() {
        // [MS-NLMP] 4.2.4.1.1: user "User", domain "Domain", password "Password".
        let key = ntowf_v2("Password", "User", "Domain").unwrap();
        assert_eq!(
            key,
            vec![
                0x0c, 0x86, 0x8a, 0x40, 0x3b, 0xfd, 0x7a, 0x93, 0xa3, 0x00, 0x1e, 0xf2, 0x2e,
                0xf0, 0x2e, 0x3f,
            ]
        );
    }

    #[test]
    fn temp_blob_layout() {
        let target_info = [0x02, 0x00, 0x04, 0x00, 0x41, 0x00, 0x00, 0x00, 0x00, 0x00];
        let temp = build_v2_temp(0x01D1_0000_0000_0000, &[0xAA; 8], &target_info);
        assert_eq!(temp[0..2], [1, 1]);
        assert_eq!(temp[2..8], [0; 6]);
        assert_eq!(temp[8..16], u64_to_bytes(0x01D1_0000_0000_0000));
        assert_eq!(temp[16..24], [0xAA; 8]);
        assert_eq!(temp.len(), 28 + target_info.len() + 4);
    }

    #[test]
    fn proof_depends_on_challenge() {
        let key = ntowf_v2("Password", "User", "Domain").unwrap();
        let temp = build_v2_temp(0, &[0xAA; 8], &[]);
        let a = nt_proof(&key, &[1; 8], &temp).unwrap();
        let b = nt_proof(&key, &[2; 8], &temp).unwrap();
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
    }

    #[test]
    fn session_base_key_is_sixteen_bytes() {
        let key = ntowf_v2("Password", "User", "Domain").unwrap();
        let proof = nt_proof(&key, &[1; 8], &[0; 28]).unwrap();
        assert_eq!(session_base_key(&key, &proof).unwrap().len(), 16);
    }
}
