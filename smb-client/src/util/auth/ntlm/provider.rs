use rand::rngs::OsRng;
use rand::RngCore;
use rc4::{KeyInit, Rc4, StreamCipher};

use smb_client_core::error::SMBError;
use smb_client_core::logging::{debug, trace};
use smb_client_core::SMBResult;

use crate::connection::Session;
use crate::util::auth::ntlm::messages::{
    NTLMAuthenticateMessage, NTLMChallengeMessage, NTLMNegotiateFlags, NTLMNegotiateMessage,
};
use crate::util::auth::spnego::{SPNEGOToken, SPNEGOTokenInit, SPNEGOTokenResponse};
use crate::util::auth::{AuthContext, Authenticator, AuthenticatorFactory};
use crate::util::crypto::ntlm;

/// 1.3.6.1.4.1.311.2.2.10
pub const NTLM_MECHANISM_ID: [u8; 10] = [0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x02, 0x02, 0x0a];

const DEFAULT_FLAGS: NTLMNegotiateFlags = NTLMNegotiateFlags::UNICODE_ENCODING
    .union(NTLMNegotiateFlags::REQUEST_TARGET)
    .union(NTLMNegotiateFlags::SIGN)
    .union(NTLMNegotiateFlags::NTLM_SESSION_SECURITY)
    .union(NTLMNegotiateFlags::ALWAYS_SIGN)
    .union(NTLMNegotiateFlags::EXTENDED_SESSION_SECURITY)
    .union(NTLMNegotiateFlags::TARGET_INFO)
    .union(NTLMNegotiateFlags::USE_128_BIT_ENCRYPTION)
    .union(NTLMNegotiateFlags::KEY_EXCHANGE)
    .union(NTLMNegotiateFlags::USE_56_BIT_ENCRYPTION);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NTLMState {
    Initial,
    NegotiateSent,
    Complete,
}

/// Client-side NTLMv2 over SPNEGO.
pub struct NTLMAuthenticator {
    state: NTLMState,
}

impl NTLMAuthenticator {
    pub fn new() -> Self {
        Self {
            state: NTLMState::Initial,
        }
    }

    fn negotiate_token(&self) -> Vec<u8> {
        let negotiate = NTLMNegotiateMessage::new(DEFAULT_FLAGS);
        SPNEGOToken::Init(SPNEGOTokenInit {
            mech_type_list: vec![NTLM_MECHANISM_ID.to_vec()],
            mech_token: Some(negotiate.as_bytes()),
        })
        .as_bytes(true)
    }

    fn challenge_response(
        &self,
        context: &AuthContext,
        input_token: &[u8],
        session: &Session,
    ) -> SMBResult<Vec<u8>> {
        let (_, token) = SPNEGOToken::parse(input_token)?;
        let SPNEGOToken::Response(response) = token else {
            return Err(SMBError::parse_error("expected a SPNEGO NegTokenResp"));
        };
        let challenge_bytes = response
            .response_token
            .ok_or_else(|| SMBError::parse_error("challenge token missing"))?;
        let challenge = NTLMChallengeMessage::parse(&challenge_bytes)?;
        trace!(flags = ?challenge.negotiate_flags(), "received NTLM challenge");

        let response_key =
            ntlm::ntowf_v2(context.password(), context.username(), context.domain())?;
        let timestamp = challenge
            .target_timestamp()
            .unwrap_or_else(ntlm::current_filetime);
        let mut client_challenge = [0u8; 8];
        OsRng.fill_bytes(&mut client_challenge);
        let temp = ntlm::build_v2_temp(timestamp, &client_challenge, challenge.target_info());
        let proof = ntlm::nt_proof(&response_key, challenge.server_challenge(), &temp)?;
        let nt_response = [proof.as_slice(), temp.as_slice()].concat();
        let session_base = ntlm::session_base_key(&response_key, &proof)?;

        let key_exchange = challenge
            .negotiate_flags()
            .contains(NTLMNegotiateFlags::KEY_EXCHANGE);
        let (session_key, encrypted_key) = if key_exchange {
            // The exported session key travels RC4-encrypted under the key
            // exchange key, which for NTLMv2 is the session base key.
            let mut exported = [0u8; 16];
            OsRng.fill_bytes(&mut exported);
            let mut key_exchange_key = [0u8; 16];
            key_exchange_key.copy_from_slice(&session_base);
            let mut encrypted = exported.to_vec();
            let mut cipher = Rc4::<rc4::consts::U16>::new((&key_exchange_key).into());
            cipher.apply_keystream(&mut encrypted);
            (exported.to_vec(), encrypted)
        } else {
            (session_base, Vec::new())
        };
        session.set_session_key(&session_key)?;
        debug!(key_exchange, "derived NTLM session key");

        let mut flags = DEFAULT_FLAGS;
        if !key_exchange {
            flags -= NTLMNegotiateFlags::KEY_EXCHANGE;
        }
        let authenticate = NTLMAuthenticateMessage::new(
            context.domain().to_string(),
            context.username().to_string(),
            nt_response,
            encrypted_key,
            flags,
        );
        Ok(SPNEGOToken::Response(SPNEGOTokenResponse {
            state: None,
            supported_mech: None,
            response_token: Some(authenticate.as_bytes()),
            mech_list_mic: None,
        })
        .as_bytes(false))
    }
}

impl Default for NTLMAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

impl Authenticator for NTLMAuthenticator {
    fn authenticate(
        &mut self,
        context: &AuthContext,
        input_token: &[u8],
        session: &Session,
    ) -> SMBResult<Vec<u8>> {
        match self.state {
            NTLMState::Initial => {
                self.state = NTLMState::NegotiateSent;
                Ok(self.negotiate_token())
            }
            NTLMState::NegotiateSent => {
                let token = self.challenge_response(context, input_token, session)?;
                self.state = NTLMState::Complete;
                Ok(token)
            }
            // A final buffer after STATUS_SUCCESS carries nothing NTLM needs.
            NTLMState::Complete => Ok(Vec::new()),
        }
    }
}

pub struct NTLMAuthenticatorFactory;

impl AuthenticatorFactory for NTLMAuthenticatorFactory {
    fn mechanism_oid(&self) -> &[u8] {
        &NTLM_MECHANISM_ID
    }

    fn supports(&self, context: &AuthContext) -> bool {
        !context.username().is_empty()
    }

    fn create(&self) -> Box<dyn Authenticator> {
        Box::new(NTLMAuthenticator::new())
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::body::SMBDialect;

    use super::*;

    #[test]
    fn first_round_emits_wrapped_negotiate() {
        let mut authenticator = NTLMAuthenticator::new();
        let context = AuthContext::new("user", "pass", "DOMAIN");
        let session = Session::new(0, false, SMBDialect::V2_1_0);

        let token = authenticator
            .authenticate(&context, &[], &session)
            .unwrap();
        let (_, parsed) = SPNEGOToken::parse(&token).unwrap();
        let SPNEGOToken::Init(init) = parsed else {
            panic!("expected an init token");
        };
        assert_eq!(init.mech_type_list, vec![NTLM_MECHANISM_ID.to_vec()]);
        let mech_token = init.mech_token.unwrap();
        assert_eq!(&mech_token[0..8], b"NTLMSSP\0");
    }

    #[test]
    fn challenge_round_sets_the_session_key() {
        use crate::byte_helper::{u16_to_bytes, u32_to_bytes};

        let mut authenticator = NTLMAuthenticator::new();
        let context = AuthContext::new("user", "pass", "DOMAIN");
        let session = Session::new(0, false, SMBDialect::V2_1_0);
        let _ = authenticator.authenticate(&context, &[], &session).unwrap();

        // Challenge without key exchange: the session key is the session
        // base key and no encrypted key is sent.
        let challenge = [
            &b"NTLMSSP\0"[0..],
            &u32_to_bytes(0x02),
            &u16_to_bytes(0),
            &u16_to_bytes(0),
            &u32_to_bytes(48),
            &u32_to_bytes(NTLMNegotiateFlags::UNICODE_ENCODING.bits()),
            &[9, 9, 9, 9, 9, 9, 9, 9],
            &[0; 8],
            &u16_to_bytes(0),
            &u16_to_bytes(0),
            &u32_to_bytes(48),
        ]
        .concat();
        let wrapped = SPNEGOToken::Response(SPNEGOTokenResponse {
            state: None,
            supported_mech: None,
            response_token: Some(challenge),
            mech_list_mic: None,
        })
        .as_bytes(false);

        assert!(!session.signatory().ready());
        let token = authenticator
            .authenticate(&context, &wrapped, &session)
            .unwrap();
        assert!(session.signatory().ready());
        assert!(!token.is_empty());

        // Third call (post-success finalization) is a no-op.
        let last = authenticator.authenticate(&context, &[], &session).unwrap();
        assert!(last.is_empty());
    }
}
