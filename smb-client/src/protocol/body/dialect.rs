use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};

#[repr(u16)]
#[derive(
    Debug,
    Eq,
    PartialEq,
    TryFromPrimitive,
    Serialize,
    Deserialize,
    Copy,
    Clone,
    Ord,
    PartialOrd,
    Default,
)]
pub enum SMBDialect {
    V2_0_2 = 0x202,
    V2_1_0 = 0x210,
    V3_0_0 = 0x300,
    V3_0_2 = 0x302,
    V3_1_1 = 0x311,
    #[default]
    V2_X_X = 0x2FF,
}

impl SMBDialect {
    /// Dialects offered by default. 3.1.1 is left out: its signing key is
    /// bound to the preauth integrity hash, which this engine does not track.
    pub fn client_defaults() -> Vec<SMBDialect> {
        vec![Self::V2_0_2, Self::V2_1_0, Self::V3_0_0, Self::V3_0_2]
    }

    pub fn is_smb3(&self) -> bool {
        matches!(self, Self::V3_0_0 | Self::V3_0_2 | Self::V3_1_1)
    }
}
