use uuid::Uuid;

use smb_client::protocol::body::{
    Capabilities, SMBBody, SMBDialect, SMBEchoRequest, SMBNegotiateRequest, SMBNegotiateResponse,
    SecurityMode,
};
use smb_client::protocol::header::{SMBCommandCode, SMBFlags, SMBHeader};
use smb_client::protocol::message::{Message, SMBMessage};
use smb_client::NTStatus;

#[test]
fn echo_message_is_header_plus_body() {
    let message = SMBMessage::new(
        SMBHeader::new_request(SMBCommandCode::Echo),
        SMBBody::EchoRequest(SMBEchoRequest::new()),
    );

    let bytes = message.as_bytes();
    assert_eq!(bytes.len(), 64 + 4);
    assert_eq!(&bytes[0..4], &[0xFE, b'S', b'M', b'B']);

    let (remaining, parsed) = SMBMessage::parse_request(&bytes).unwrap();
    assert!(remaining.is_empty());
    assert_eq!(parsed, message);
}

#[test]
fn negotiate_exchange_round_trips() {
    let request = SMBMessage::new(
        SMBHeader::new_request(SMBCommandCode::Negotiate),
        SMBBody::NegotiateRequest(SMBNegotiateRequest::new(
            SMBDialect::client_defaults(),
            Uuid::new_v4(),
            false,
        )),
    );
    let (_, parsed) = SMBMessage::parse_request(&request.as_bytes()).unwrap();
    assert_eq!(parsed, request);

    let mut header = SMBHeader::new_request(SMBCommandCode::Negotiate);
    header.flags = SMBFlags::SERVER_TO_REDIR;
    header.credits = 1;
    let response = SMBMessage::new(
        header,
        SMBBody::NegotiateResponse(SMBNegotiateResponse::new(
            SecurityMode::NEGOTIATE_SIGNING_ENABLED,
            SMBDialect::V3_0_0,
            Uuid::new_v4(),
            Capabilities::LARGE_MTU,
            65536,
            65536,
            65536,
            Vec::new(),
        )),
    );
    let (_, parsed) = SMBMessage::parse_response(&response.as_bytes()).unwrap();
    assert_eq!(parsed, response);
}

#[test]
fn error_status_responses_decode_to_raw_bodies() {
    let mut header = SMBHeader::new_request(SMBCommandCode::SessionSetup);
    header.flags = SMBFlags::SERVER_TO_REDIR;
    header.status = 0xC000_006D; // STATUS_LOGON_FAILURE
    let error_body = vec![9, 0, 0, 0, 0, 0, 0, 0];
    let message = SMBMessage::new(header, SMBBody::Raw(error_body.clone()));

    let (_, parsed) = SMBMessage::parse_response(&message.as_bytes()).unwrap();
    assert_eq!(parsed.header.nt_status(), NTStatus::StatusLogonFailure);
    assert_eq!(parsed.body, SMBBody::Raw(error_body));
}

#[test]
fn unmodeled_commands_pass_through_raw() {
    let mut header = SMBHeader::new_request(SMBCommandCode::TreeConnect);
    header.flags = SMBFlags::SERVER_TO_REDIR;
    let payload = vec![16, 0, 1, 0, 0, 0, 0, 0];
    let message = SMBMessage::new(header, SMBBody::Raw(payload.clone()));

    let (_, parsed) = SMBMessage::parse_response(&message.as_bytes()).unwrap();
    assert_eq!(parsed.body, SMBBody::Raw(payload));
}
