pub mod messages;
mod provider;

pub use messages::{
    NTLMAuthenticateMessage, NTLMChallengeMessage, NTLMNegotiateFlags, NTLMNegotiateMessage,
};
pub use provider::{NTLMAuthenticator, NTLMAuthenticatorFactory, NTLM_MECHANISM_ID};
