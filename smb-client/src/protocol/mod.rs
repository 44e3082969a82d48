use smb_client_core::error::SMBError;

pub mod body;
pub mod header;
pub mod message;

/// Converts a `nom` parser failure into the crate error without dragging the
/// unparsed input bytes along.
pub(crate) fn parse_failure<I>(error: nom::Err<nom::error::Error<I>>) -> SMBError {
    match error {
        nom::Err::Incomplete(_) => SMBError::parse_error("incomplete input"),
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            SMBError::parse_error(format!("parser failed with {:?}", e.code))
        }
    }
}
