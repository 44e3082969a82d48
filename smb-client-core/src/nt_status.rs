use num_enum::TryFromPrimitive;

/// NT status codes the connection engine inspects.
///
/// Any other code on a completed response is handed back to the caller
/// untouched; see [`NTStatus::from_code`].
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
pub enum NTStatus {
    StatusSuccess = 0x0,
    StatusPending = 0x00000103,
    SecIContinueNeeded = 0x00090312,
    InvalidParameter = 0xC000000D,
    MoreProcessingRequired = 0xC0000016,
    AccessDenied = 0xC0000022,
    StatusLogonFailure = 0xC000006D,
    StatusNotSupported = 0xC00000BB,
    RequestNotAccepted = 0xC00000D0,
    UserSessionDeleted = 0xC0000203,
    NetworkSessionExpired = 0xC000035C,
    UnknownError = 0xFFFFFFFF,
}

impl NTStatus {
    /// Maps a raw wire status onto the known set, collapsing everything the
    /// engine does not branch on into `UnknownError`. The raw code stays
    /// available on the packet header.
    pub fn from_code(code: u32) -> Self {
        Self::try_from(code).unwrap_or(Self::UnknownError)
    }

    pub fn is_success(&self) -> bool {
        *self == Self::StatusSuccess
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_map_to_variants() {
        assert_eq!(NTStatus::from_code(0), NTStatus::StatusSuccess);
        assert_eq!(NTStatus::from_code(0x103), NTStatus::StatusPending);
        assert_eq!(
            NTStatus::from_code(0xC0000016),
            NTStatus::MoreProcessingRequired
        );
        assert_eq!(
            NTStatus::from_code(0xC000035C),
            NTStatus::NetworkSessionExpired
        );
    }

    #[test]
    fn unknown_codes_collapse() {
        assert_eq!(NTStatus::from_code(0xC0000135), NTStatus::UnknownError);
        assert!(!NTStatus::from_code(0xC0000135).is_success());
    }
}
