use std::io::Write;

use bytes::BytesMut;
use flate2::Compression;
use flate2::write::GzEncoder;
use wirelink::http::flags::{CacheControl, Connection, ContentEncoding, Method, TransferEncoding};
use wirelink::http::message::{HttpMessage, KeepAlive, MessageLimits};
use wirelink::http::parser::ParseError;
use wirelink::http::status::StatusCode;
use wirelink::transport::SocketId;

fn parse(bytes: &[u8], limits: MessageLimits) -> HttpMessage {
    let mut msg = HttpMessage::inbound(SocketId(1), limits);
    let n = msg.deserialize_headers(bytes, false).unwrap();
    assert!(msg.is_headers_read());
    let rest = &bytes[n..];
    if !rest.is_empty() {
        msg.deserialize_body(rest).unwrap();
    }
    msg
}

#[test]
fn test_request_round_trip() {
    let mut request = HttpMessage::request(Method::POST, "/upload?x=1");
    request.push_header("Host", "example.com");
    request.push_header("X-Trace", "abc");
    request.set_body("payload");

    let wire = request.to_bytes(Some("agent/1"));
    let parsed = parse(&wire, MessageLimits::default());

    assert!(parsed.is_request());
    assert!(parsed.is_finished());
    assert_eq!(parsed.method(), Method::POST);
    assert_eq!(parsed.path(), "/upload?x=1");
    assert_eq!(parsed.header("host"), Some("example.com"));
    assert_eq!(parsed.header("X-TRACE"), Some("abc"));
    assert_eq!(parsed.header("User-Agent"), Some("agent/1"));
    assert_eq!(parsed.connection(), Connection::KeepAlive);
    assert_eq!(parsed.declared_content_length(), Some(7));
    assert_eq!(parsed.body(), b"payload");
}

#[test]
fn test_last_pushed_header_wins() {
    let mut msg = HttpMessage::request(Method::GET, "/");
    msg.push_header("X-A", "1");
    msg.push_header("x-a", "2");
    assert_eq!(msg.header("X-A"), Some("2"));

    let parsed = parse(
        b"GET / HTTP/1.1\r\nX-A: 1\r\nx-a: 2\r\n\r\n",
        MessageLimits::default(),
    );
    assert_eq!(parsed.header("x-A"), Some("2"));
}

#[test]
fn test_header_table_capacity() {
    let limits = MessageLimits {
        max_headers: 2,
        ..MessageLimits::default()
    };
    let mut msg = HttpMessage::with_limits(limits);
    assert!(msg.push_header("A", "1"));
    assert!(msg.push_header("B", "2"));
    assert!(!msg.push_header("C", "3"));
    assert_eq!(msg.header("c"), None);
}

#[test]
fn test_large_body_switches_to_chunked() {
    let request = HttpMessage::request(Method::GET, "/");
    let body: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    let mut response = HttpMessage::response(&request, body.clone(), StatusCode::Ok);

    let mut wire = BytesMut::new();
    response.serialize_headers(&mut wire, 128, None);
    assert_eq!(response.transfer_encoding(), TransferEncoding::Chunked);

    let mut calls = 0;
    while !response.is_body_sent() {
        let mut piece = BytesMut::new();
        let n = response.serialize_body(&mut piece, 128);
        assert!(n <= 128);
        assert_eq!(n, piece.len());
        wire.extend_from_slice(&piece);
        calls += 1;
        assert!(calls < 100, "body never finished");
    }

    // Once the terminal chunk is out nothing more is written.
    let mut extra = BytesMut::new();
    assert_eq!(response.serialize_body(&mut extra, 128), 0);
    assert!(extra.is_empty());

    let terminal = b"\r\n0\r\n\r\n";
    let count = wire.windows(terminal.len()).filter(|w| *w == terminal).count();
    assert_eq!(count, 1);
    assert!(wire.ends_with(terminal));

    let text = String::from_utf8_lossy(&wire);
    assert!(text.contains("Transfer-Encoding: chunked\r\n"));
    assert!(!text.contains("Content-Length"));

    let parsed = parse(&wire, MessageLimits::default());
    assert!(parsed.is_finished());
    assert_eq!(parsed.status(), StatusCode::Ok);
    assert_eq!(parsed.body(), &body[..]);
}

#[test]
fn test_chunked_body_fed_byte_by_byte() {
    let head = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n";
    let body = b"5\r\nhello\r\n6;ext=1\r\n world\r\n0\r\nX-Checksum: 42\r\n\r\n";

    let mut msg = HttpMessage::inbound(SocketId(7), MessageLimits::default());
    assert_eq!(msg.deserialize_headers(head, false).unwrap(), head.len());

    let mut carry = Vec::new();
    for byte in body {
        carry.push(*byte);
        let n = msg.deserialize_body(&carry).unwrap();
        carry.drain(..n);
    }

    assert!(carry.is_empty());
    assert!(msg.is_finished());
    assert_eq!(msg.body(), b"hello world");
    assert_eq!(msg.header("x-checksum"), Some("42"));
}

#[test]
fn test_chunk_without_crlf_is_rejected() {
    let mut msg = parse(
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n",
        MessageLimits::default(),
    );
    let err = msg.deserialize_body(b"3\r\nabcX\r\n").unwrap_err();
    assert!(matches!(err, ParseError::MissingCrlf));
}

#[test]
fn test_declared_body_over_capacity() {
    let limits = MessageLimits {
        body_capacity: 8,
        ..MessageLimits::default()
    };
    let msg = parse(b"POST /big HTTP/1.1\r\nContent-Length: 20\r\n\r\n", limits);
    assert!(msg.is_content_too_large());
    assert!(!msg.is_finished());
}

#[test]
fn test_read_until_close_body_is_truncated_to_capacity() {
    let limits = MessageLimits {
        body_capacity: 8,
        ..MessageLimits::default()
    };
    let mut msg = parse(b"HTTP/1.1 200 OK\r\n\r\n0123456789abcdefghij", limits);
    assert_eq!(msg.body(), b"01234567");
    assert!(msg.is_content_too_large());

    msg.deserialize_body(&[]).unwrap();
    assert_eq!(msg.declared_content_length(), Some(20));
    assert!(!msg.is_finished());
}

#[test]
fn test_eof_before_content_length() {
    let mut msg = parse(
        b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc",
        MessageLimits::default(),
    );
    let err = msg.deserialize_body(&[]).unwrap_err();
    assert!(matches!(err, ParseError::UnexpectedEof));
}

#[test]
fn test_gzip_body_is_decoded() {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(b"hello, compressed world").unwrap();
    let gz = encoder.finish().unwrap();

    let mut wire = format!(
        "HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nContent-Length: {}\r\n\r\n",
        gz.len()
    )
    .into_bytes();
    wire.extend_from_slice(&gz);

    let msg = parse(&wire, MessageLimits::default());
    assert_eq!(msg.content_encoding(), ContentEncoding::Gzip);
    assert_eq!(msg.body(), &gz[..]);
    assert_eq!(&msg.decoded_body().unwrap()[..], b"hello, compressed world");
}

#[test]
fn test_brotli_body_is_not_decoded() {
    let msg = parse(
        b"HTTP/1.1 200 OK\r\nContent-Encoding: br\r\nContent-Length: 2\r\n\r\nxx",
        MessageLimits::default(),
    );
    assert!(matches!(
        msg.decoded_body(),
        Err(ParseError::UnsupportedEncoding(ContentEncoding::Br))
    ));
}

#[test]
fn test_chunked_request_without_length_is_variable_sized() {
    let msg = parse(
        b"POST / HTTP/1.1\r\nTransfer-Encoding: gzip, chunked\r\n\r\n",
        MessageLimits::default(),
    );
    assert!(msg.is_variable_sized());

    let sized = parse(
        b"POST / HTTP/1.1\r\nContent-Length: 0\r\n\r\n",
        MessageLimits::default(),
    );
    assert!(!sized.is_variable_sized());
}

#[test]
fn test_cache_control_and_keep_alive_are_typed() {
    let msg = parse(
        b"HTTP/1.1 200 OK\r\nCache-Control: max-age=60, no-store\r\nKeep-Alive: timeout=5, max=100\r\nConnection: keep-alive\r\nContent-Length: 0\r\n\r\n",
        MessageLimits::default(),
    );
    assert_eq!(msg.cache_control(), (CacheControl::NoStore, Some(60)));
    assert_eq!(msg.keep_alive(), Some(KeepAlive { timeout: 5, max: 100 }));
    assert_eq!(msg.connection(), Connection::KeepAlive);
    assert!(msg.is_finished());
}

#[test]
fn test_connection_upgrade_wins_over_keep_alive() {
    let msg = parse(
        b"GET /ws HTTP/1.1\r\nConnection: keep-alive, Upgrade\r\n\r\n",
        MessageLimits::default(),
    );
    assert_eq!(msg.connection(), Connection::Upgrade);
}

#[test]
fn test_no_content_response_has_no_length() {
    let request = HttpMessage::request(Method::DELETE, "/item/1");
    let mut response = HttpMessage::response(&request, Vec::new(), StatusCode::from_u16(204));
    let text = String::from_utf8(response.to_bytes(None).to_vec()).unwrap();
    assert!(text.starts_with("HTTP/1.1 204 "));
    assert!(!text.contains("Content-Length"));
}

#[test]
fn test_stray_crlf_before_request_line() {
    let msg = parse(b"\r\n\r\nGET /late HTTP/1.1\r\n\r\n", MessageLimits::default());
    assert_eq!(msg.path(), "/late");
    assert!(msg.is_finished());
}

#[test]
fn test_lowercase_method_is_rejected() {
    let mut msg = HttpMessage::default();
    let err = msg.deserialize_headers(b"get / HTTP/1.1\r\n\r\n", false).unwrap_err();
    assert!(matches!(err, ParseError::InvalidMethod(m) if m == "get"));
}

#[test]
fn test_overlong_header_line() {
    let limits = MessageLimits {
        header_bytes: 32,
        ..MessageLimits::default()
    };
    let mut msg = HttpMessage::with_limits(limits);
    let line = format!("GET /{} HTTP/1.1", "a".repeat(64));
    let err = msg.deserialize_headers(line.as_bytes(), false).unwrap_err();
    assert!(matches!(err, ParseError::HeaderTooLarge(32)));
}

#[test]
fn test_status_codes() {
    assert_eq!(StatusCode::from_u16(600), StatusCode::DomainNoResponse);
    assert_eq!(StatusCode::DomainNoResponse.as_u16(), 600);
    assert_eq!(StatusCode::RequestTimeout.reason_phrase(), "Request Timeout");
    assert_eq!(StatusCode::from_u16(418), StatusCode::Other(418));
    assert!(!StatusCode::from_u16(418).is_known());
}
