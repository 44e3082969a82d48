use nom::bytes::complete::take;
use nom::combinator::verify;
use nom::number::complete::le_u16;
use nom::IResult;
use serde::{Deserialize, Serialize};

/// LOGOFF request/response bodies ([MS-SMB2] 2.2.7/2.2.8): a structure size
/// of 4 and two reserved bytes.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Default)]
pub struct SMBLogoffRequest;

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Default)]
pub struct SMBLogoffResponse;

impl SMBLogoffRequest {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(bytes: &[u8]) -> IResult<&[u8], Self> {
        let (remaining, _) = verify(le_u16, |size| *size == 4)(bytes)?;
        let (remaining, _) = take(2_usize)(remaining)?;
        Ok((remaining, Self))
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        vec![4, 0, 0, 0]
    }
}

impl SMBLogoffResponse {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(bytes: &[u8]) -> IResult<&[u8], Self> {
        let (remaining, _) = verify(le_u16, |size| *size == 4)(bytes)?;
        let (remaining, _) = take(2_usize)(remaining)?;
        Ok((remaining, Self))
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        vec![4, 0, 0, 0]
    }
}
