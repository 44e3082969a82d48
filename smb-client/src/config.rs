use std::sync::Arc;
use std::time::Duration;

use derive_builder::Builder;
use uuid::Uuid;

use crate::protocol::body::SMBDialect;
use crate::util::auth::ntlm::NTLMAuthenticatorFactory;
use crate::util::auth::AuthenticatorFactory;

const DEFAULT_TRANSACT_TIMEOUT: Duration = Duration::from_secs(60);

/// Client-side connection configuration.
#[derive(Builder, Clone)]
#[builder(pattern = "owned")]
pub struct SMBConfig {
    #[builder(default = "Uuid::new_v4()")]
    client_guid: Uuid,
    #[builder(default = "SMBDialect::client_defaults()")]
    dialects: Vec<SMBDialect>,
    #[builder(default)]
    signing_required: bool,
    #[builder(default = "DEFAULT_TRANSACT_TIMEOUT")]
    transact_timeout: Duration,
    #[builder(default = "default_authenticators()")]
    authenticators: Vec<Arc<dyn AuthenticatorFactory>>,
}

fn default_authenticators() -> Vec<Arc<dyn AuthenticatorFactory>> {
    vec![Arc::new(NTLMAuthenticatorFactory)]
}

impl SMBConfig {
    pub fn builder() -> SMBConfigBuilder {
        SMBConfigBuilder::default()
    }

    pub fn client_guid(&self) -> Uuid {
        self.client_guid
    }

    pub fn dialects(&self) -> &[SMBDialect] {
        &self.dialects
    }

    pub fn signing_required(&self) -> bool {
        self.signing_required
    }

    pub fn transact_timeout(&self) -> Duration {
        self.transact_timeout
    }

    pub fn authenticators(&self) -> &[Arc<dyn AuthenticatorFactory>] {
        &self.authenticators
    }
}

impl std::fmt::Debug for SMBConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SMBConfig")
            .field("client_guid", &self.client_guid)
            .field("dialects", &self.dialects)
            .field("signing_required", &self.signing_required)
            .field("transact_timeout", &self.transact_timeout)
            .finish()
    }
}

impl Default for SMBConfig {
    fn default() -> Self {
        Self {
            client_guid: Uuid::new_v4(),
            dialects: SMBDialect::client_defaults(),
            signing_required: false,
            transact_timeout: DEFAULT_TRANSACT_TIMEOUT,
            authenticators: default_authenticators(),
        }
    }
}
