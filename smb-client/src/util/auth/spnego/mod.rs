//! Just enough SPNEGO (RFC 4178) to drive SESSION_SETUP: the `NegTokenInit`
//! the client opens with (and servers hand out in the NEGOTIATE response),
//! and the `NegTokenResp` exchanged on every later round.

use nom::multi::many0;
use nom::number::complete::le_u8;
use nom::IResult;
use num_enum::TryFromPrimitive;

use smb_client_core::SMBParseResult;

use crate::protocol::parse_failure;

mod der;

use der::{
    parse_field_with_len, parse_tagged, parse_tlv, wrap, APPLICATION_TAG, ENUMERATED_TAG,
    MECH_LIST_MIC_TAG, MECH_TOKEN_TAG, MECH_TYPE_LIST_TAG, NEG_STATE_TAG, NEG_TOKEN_INIT_TAG,
    NEG_TOKEN_RESP_TAG, OCTET_STRING_TAG, OID_TAG, RESPONSE_TOKEN_TAG, SEQUENCE_TAG, SPNEGO_OID,
    SUPPORTED_MECH_TAG,
};

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, TryFromPrimitive)]
pub enum NegotiateState {
    AcceptCompleted = 0x0,
    AcceptIncomplete,
    Reject,
    RequestMic,
}

#[derive(Debug, Default, PartialEq, Eq, Clone)]
pub struct SPNEGOTokenInit {
    pub mech_type_list: Vec<Vec<u8>>,
    pub mech_token: Option<Vec<u8>>,
}

#[derive(Debug, Default, PartialEq, Eq, Clone)]
pub struct SPNEGOTokenResponse {
    pub state: Option<NegotiateState>,
    pub supported_mech: Option<Vec<u8>>,
    pub response_token: Option<Vec<u8>>,
    pub mech_list_mic: Option<Vec<u8>>,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum SPNEGOToken {
    Init(SPNEGOTokenInit),
    Response(SPNEGOTokenResponse),
}

impl SPNEGOToken {
    pub fn parse(bytes: &[u8]) -> SMBParseResult<&[u8], Self> {
        Self::parse_inner(bytes).map_err(parse_failure)
    }

    fn parse_inner(bytes: &[u8]) -> IResult<&[u8], Self> {
        let (remaining, tag) = le_u8(bytes)?;
        match tag {
            APPLICATION_TAG => {
                let (rest, content) = parse_field_with_len(remaining)?;
                let (content, oid) = parse_tagged(content, OID_TAG)?;
                if oid != SPNEGO_OID {
                    return Err(nom::Err::Error(nom::error::Error::new(
                        bytes,
                        nom::error::ErrorKind::Tag,
                    )));
                }
                let (content, tag) = le_u8(content)?;
                let (_, token) = match tag {
                    NEG_TOKEN_INIT_TAG => {
                        let (content, body) = SPNEGOTokenInit::parse(content)?;
                        (content, SPNEGOToken::Init(body))
                    }
                    NEG_TOKEN_RESP_TAG => {
                        let (content, body) = SPNEGOTokenResponse::parse(content)?;
                        (content, SPNEGOToken::Response(body))
                    }
                    _ => {
                        return Err(nom::Err::Error(nom::error::Error::new(
                            bytes,
                            nom::error::ErrorKind::Tag,
                        )))
                    }
                };
                Ok((rest, token))
            }
            NEG_TOKEN_RESP_TAG => {
                let (remaining, body) = SPNEGOTokenResponse::parse(remaining)?;
                Ok((remaining, SPNEGOToken::Response(body)))
            }
            _ => Err(nom::Err::Error(nom::error::Error::new(
                bytes,
                nom::error::ErrorKind::Tag,
            ))),
        }
    }

    /// Serializes the token; `header` adds the GSS-API application wrapper
    /// with the SPNEGO OID (only the very first token of an exchange carries
    /// it).
    pub fn as_bytes(&self, header: bool) -> Vec<u8> {
        let body = match self {
            SPNEGOToken::Init(token) => token.as_bytes(),
            SPNEGOToken::Response(token) => token.as_bytes(),
        };
        if header {
            let content = [wrap(OID_TAG, &SPNEGO_OID), body].concat();
            wrap(APPLICATION_TAG, &content)
        } else {
            body
        }
    }
}

impl SPNEGOTokenInit {
    fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (remaining, content) = parse_field_with_len(input)?;
        let (_, mut sequence) = parse_tagged(content, SEQUENCE_TAG)?;
        let mut init = SPNEGOTokenInit::default();
        while !sequence.is_empty() {
            let (rest, (tag, field)) = parse_tlv(sequence)?;
            sequence = rest;
            match tag {
                MECH_TYPE_LIST_TAG => {
                    let (_, oid_sequence) = parse_tagged(field, SEQUENCE_TAG)?;
                    let (_, oids) = many0(|input| parse_tagged(input, OID_TAG))(oid_sequence)?;
                    init.mech_type_list = oids.into_iter().map(<[u8]>::to_vec).collect();
                }
                MECH_TOKEN_TAG => {
                    let (_, token) = parse_tagged(field, OCTET_STRING_TAG)?;
                    init.mech_token = Some(token.to_vec());
                }
                // negHints, mechListMIC and anything newer are irrelevant to
                // mechanism selection
                _ => {}
            }
        }
        Ok((remaining, init))
    }

    fn as_bytes(&self) -> Vec<u8> {
        let mut fields = Vec::new();
        if !self.mech_type_list.is_empty() {
            let oids = self
                .mech_type_list
                .iter()
                .flat_map(|oid| wrap(OID_TAG, oid))
                .collect::<Vec<u8>>();
            fields.extend(wrap(MECH_TYPE_LIST_TAG, &wrap(SEQUENCE_TAG, &oids)));
        }
        if let Some(token) = &self.mech_token {
            fields.extend(wrap(MECH_TOKEN_TAG, &wrap(OCTET_STRING_TAG, token)));
        }
        wrap(NEG_TOKEN_INIT_TAG, &wrap(SEQUENCE_TAG, &fields))
    }
}

impl SPNEGOTokenResponse {
    fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (remaining, content) = parse_field_with_len(input)?;
        let (_, mut sequence) = parse_tagged(content, SEQUENCE_TAG)?;
        let mut response = SPNEGOTokenResponse::default();
        while !sequence.is_empty() {
            let (rest, (tag, field)) = parse_tlv(sequence)?;
            sequence = rest;
            match tag {
                NEG_STATE_TAG => {
                    let (_, state) = parse_tagged(field, ENUMERATED_TAG)?;
                    let (_, value) = le_u8(state)?;
                    response.state = NegotiateState::try_from(value).ok();
                }
                SUPPORTED_MECH_TAG => {
                    let (_, mech) = parse_tagged(field, OID_TAG)?;
                    response.supported_mech = Some(mech.to_vec());
                }
                RESPONSE_TOKEN_TAG => {
                    let (_, token) = parse_tagged(field, OCTET_STRING_TAG)?;
                    response.response_token = Some(token.to_vec());
                }
                MECH_LIST_MIC_TAG => {
                    let (_, mic) = parse_tagged(field, OCTET_STRING_TAG)?;
                    response.mech_list_mic = Some(mic.to_vec());
                }
                _ => {}
            }
        }
        Ok((remaining, response))
    }

    fn as_bytes(&self) -> Vec<u8> {
        let mut fields = Vec::new();
        if let Some(state) = self.state {
            fields.extend(wrap(NEG_STATE_TAG, &wrap(ENUMERATED_TAG, &[state as u8])));
        }
        if let Some(mech) = &self.supported_mech {
            fields.extend(wrap(SUPPORTED_MECH_TAG, &wrap(OID_TAG, mech)));
        }
        if let Some(token) = &self.response_token {
            fields.extend(wrap(RESPONSE_TOKEN_TAG, &wrap(OCTET_STRING_TAG, token)));
        }
        if let Some(mic) = &self.mech_list_mic {
            fields.extend(wrap(MECH_LIST_MIC_TAG, &wrap(OCTET_STRING_TAG, mic)));
        }
        wrap(NEG_TOKEN_RESP_TAG, &wrap(SEQUENCE_TAG, &fields))
    }
}
