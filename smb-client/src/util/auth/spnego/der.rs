//! The handful of DER pieces SPNEGO needs: tags, the length octets, and
//! tag-length-value framing.

use nom::bytes::complete::take;
use nom::multi::fold_many_m_n;
use nom::number::complete::le_u8;
use nom::IResult;

pub(crate) const APPLICATION_TAG: u8 = 0x60;
pub(crate) const SEQUENCE_TAG: u8 = 0x30;
pub(crate) const OID_TAG: u8 = 0x06;
pub(crate) const OCTET_STRING_TAG: u8 = 0x04;
pub(crate) const ENUMERATED_TAG: u8 = 0x0A;

pub(crate) const NEG_TOKEN_INIT_TAG: u8 = 0xA0;
pub(crate) const NEG_TOKEN_RESP_TAG: u8 = 0xA1;

pub(crate) const MECH_TYPE_LIST_TAG: u8 = 0xA0;
pub(crate) const MECH_TOKEN_TAG: u8 = 0xA2;
pub(crate) const MECH_LIST_MIC_TAG: u8 = 0xA3;

pub(crate) const NEG_STATE_TAG: u8 = 0xA0;
pub(crate) const SUPPORTED_MECH_TAG: u8 = 0xA1;
pub(crate) const RESPONSE_TOKEN_TAG: u8 = 0xA2;

/// 1.3.6.1.5.5.2
pub(crate) const SPNEGO_OID: [u8; 6] = [0x2b, 0x06, 0x01, 0x05, 0x05, 0x02];

pub(crate) fn parse_length(buffer: &[u8]) -> IResult<&[u8], usize> {
    let (remaining, len) = le_u8(buffer)?;
    if len < 0x80 {
        return Ok((remaining, len as usize));
    }
    let field_size = (len & 0x7f) as usize;
    fold_many_m_n(field_size, field_size, le_u8, || 0_usize, |len, item| {
        len * 256 + item as usize
    })(remaining)
}

pub(crate) fn parse_field_with_len(buffer: &[u8]) -> IResult<&[u8], &[u8]> {
    let (remaining, len) = parse_length(buffer)?;
    take(len)(remaining)
}

/// Tag byte plus length-framed content.
pub(crate) fn parse_tlv(buffer: &[u8]) -> IResult<&[u8], (u8, &[u8])> {
    let (remaining, tag) = le_u8(buffer)?;
    let (remaining, content) = parse_field_with_len(remaining)?;
    Ok((remaining, (tag, content)))
}

/// Like [`parse_tlv`] but fails unless the tag matches.
pub(crate) fn parse_tagged(buffer: &[u8], expected: u8) -> IResult<&[u8], &[u8]> {
    let (remaining, (tag, content)) = parse_tlv(buffer)?;
    if tag != expected {
        return Err(nom::Err::Error(nom::error::Error::new(
            buffer,
            nom::error::ErrorKind::Tag,
        )));
    }
    Ok((remaining, content))
}

pub(crate) fn encode_length(length: usize) -> Vec<u8> {
    if length < 0x80 {
        return vec![length as u8];
    }
    let mut bytes = Vec::new();
    let mut value = length;
    while value > 0 {
        bytes.push((value & 0xFF) as u8);
        value >>= 8;
    }
    bytes.reverse();
    let mut encoded = vec![0x80 | bytes.len() as u8];
    encoded.extend(bytes);
    encoded
}

pub(crate) fn wrap(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(2 + content.len());
    bytes.push(tag);
    bytes.extend(encode_length(content.len()));
    bytes.extend_from_slice(content);
    bytes
}
