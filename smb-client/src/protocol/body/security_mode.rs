use bitflags::bitflags;

use crate::util::flags_helper::impl_serde_for_bitflags;

bitflags! {
    /// Security mode field of NEGOTIATE (u16 on the wire) and SESSION_SETUP
    /// (u8 on the wire, same bit meanings).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct SecurityMode: u16 {
        const NEGOTIATE_SIGNING_ENABLED = 0x01;
        const NEGOTIATE_SIGNING_REQUIRED = 0x02;
    }
}

impl SecurityMode {
    pub fn for_client(signing_required: bool) -> Self {
        if signing_required {
            Self::NEGOTIATE_SIGNING_ENABLED | Self::NEGOTIATE_SIGNING_REQUIRED
        } else {
            Self::NEGOTIATE_SIGNING_ENABLED
        }
    }
}

impl_serde_for_bitflags! { SecurityMode: u16 }
