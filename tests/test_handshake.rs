use wirelink::http::flags::{Connection, Upgrade};
use wirelink::http::message::HttpMessage;
use wirelink::http::status::StatusCode;
use wirelink::transport::SocketId;
use wirelink::websocket::handshake::{
    HandshakeError, VERSION, accept_key, switching_response, upgrade_request, validate_request,
    validate_response,
};

const KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

fn reparse(mut msg: HttpMessage) -> HttpMessage {
    let wire = msg.to_bytes(None);
    let mut parsed = HttpMessage::default();
    let n = parsed.deserialize_headers(&wire, false).unwrap();
    assert_eq!(n, wire.len());
    parsed
}

#[test]
fn test_accept_key_matches_rfc_example() {
    assert_eq!(accept_key(KEY), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
}

#[test]
fn test_upgrade_request_survives_the_wire() {
    let protocols = vec!["chat".to_string(), "superchat".to_string()];
    let request = upgrade_request("server.example.com", "/chat", Some("http://example.com"), KEY, &protocols);
    let parsed = reparse(request);

    assert_eq!(parsed.path(), "/chat");
    assert_eq!(parsed.upgrade(), Upgrade::WebSocket);
    assert_eq!(parsed.connection(), Connection::Upgrade);
    assert_eq!(parsed.websocket_version(), VERSION);
    assert_eq!(parsed.header("origin"), Some("http://example.com"));
    assert_eq!(parsed.header("sec-websocket-protocol"), Some("chat, superchat"));

    assert_eq!(validate_request(&parsed, None), Ok(KEY.to_string()));
    assert_eq!(validate_request(&parsed, Some("superchat")), Ok(KEY.to_string()));
    assert_eq!(
        validate_request(&parsed, Some("mqtt")),
        Err(HandshakeError::ProtocolMismatch("mqtt".to_string()))
    );
}

#[test]
fn test_request_without_upgrade_headers() {
    let plain = reparse(HttpMessage::request(
        wirelink::http::flags::Method::GET,
        "/chat",
    ));
    assert_eq!(validate_request(&plain, None), Err(HandshakeError::NotUpgrade));
}

#[test]
fn test_request_with_wrong_version() {
    let mut request = upgrade_request("h", "/", None, KEY, &[]);
    request.set_websocket_version(8);
    let parsed = reparse(request);
    assert_eq!(
        validate_request(&parsed, None),
        Err(HandshakeError::UnsupportedVersion(8))
    );
}

#[test]
fn test_request_without_key() {
    let mut parsed = HttpMessage::default();
    parsed
        .deserialize_headers(
            b"GET / HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Version: 13\r\n\r\n",
            false,
        )
        .unwrap();
    assert_eq!(validate_request(&parsed, None), Err(HandshakeError::MissingKey));
}

#[test]
fn test_switching_response_round_trip() {
    let response = reparse(switching_response(SocketId(4), KEY, Some("chat")));
    assert_eq!(response.status(), StatusCode::SwitchingProtocols);
    assert_eq!(response.header("sec-websocket-protocol"), Some("chat"));
    assert_eq!(validate_response(&response, KEY), Ok(()));
}

#[test]
fn test_response_checks() {
    let mut not_switching = HttpMessage::default();
    not_switching.set_status(StatusCode::Ok);
    assert_eq!(
        validate_response(&not_switching, KEY),
        Err(HandshakeError::UnexpectedStatus(200))
    );

    let mut no_accept = HttpMessage::default();
    no_accept.set_status(StatusCode::SwitchingProtocols);
    assert_eq!(
        validate_response(&no_accept, KEY),
        Err(HandshakeError::MissingAccept)
    );
}
