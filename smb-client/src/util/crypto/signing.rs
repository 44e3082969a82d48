use aes::Aes128;
use cmac::Cmac;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use smb_client_core::error::SMBError;
use smb_client_core::SMBResult;

use crate::protocol::body::SMBDialect;
use crate::util::crypto::kdf;

/// Computes the 16-byte signature of a serialized message whose signature
/// field is already zeroed ([MS-SMB2] 3.1.4.1): HMAC-SHA256 for the 2.x
/// dialects, AES-128-CMAC for 3.x.
pub fn calculate_signature(
    signing_key: &[u8],
    dialect: SMBDialect,
    message: &[u8],
) -> SMBResult<[u8; 16]> {
    let digest = if dialect.is_smb3() {
        <Cmac<Aes128>>::new_from_slice(signing_key)
            .map_err(|_| SMBError::crypto_error("invalid signing key length"))?
            .chain_update(message)
            .finalize()
            .into_bytes()
            .to_vec()
    } else {
        <Hmac<Sha256>>::new_from_slice(signing_key)
            .map_err(|_| SMBError::crypto_error("invalid signing key length"))?
            .chain_update(message)
            .finalize()
            .into_bytes()
            .to_vec()
    };
    let mut signature = [0u8; 16];
    signature.copy_from_slice(&digest[..16]);
    Ok(signature)
}

/// Derives the per-session signing key from the GSS session key
/// ([MS-SMB2] 3.2.5.3.1): the session key itself for 2.x, SP 800-108 with
/// the `SMB2AESCMAC`/`SmbSign` label and context for 3.0/3.0.2. 3.1.1 binds
/// the derivation to the preauth integrity hash, which this engine does not
/// track.
pub fn generate_signing_key(session_key: &[u8], dialect: SMBDialect) -> SMBResult<Vec<u8>> {
    let key = normalized_key(session_key);
    if !dialect.is_smb3() {
        return Ok(key.to_vec());
    }
    if dialect == SMBDialect::V3_1_1 {
        return Err(SMBError::precondition_failed(
            "3.1.1 signing keys require the preauth integrity hash",
        ));
    }
    let hmac = <Hmac<Sha256>>::new_from_slice(&key)
        .map_err(|_| SMBError::crypto_error("invalid session key length"))?;
    Ok(kdf::derive_key(hmac, b"SMB2AESCMAC\0", b"SmbSign\0", 128))
}

// The full GSS session key may be longer or shorter than the 16 bytes SMB2
// uses; truncate or zero-pad per [MS-SMB2] 3.2.5.3.
fn normalized_key(session_key: &[u8]) -> [u8; 16] {
    let mut key = [0u8; 16];
    let len = session_key.len().min(16);
    key[..len].copy_from_slice(&session_key[..len]);
    key
}
