use std::sync::{Arc, Mutex};
use std::time::Duration;

use wirelink::driver::DriverError;
use wirelink::http::driver::{HttpConfig, HttpDriver};
use wirelink::http::flags::{Connection, Method};
use wirelink::http::message::{HttpMessage, MessageLimits};
use wirelink::http::status::StatusCode;
use wirelink::transport::{MemoryTransport, SocketId, SocketState, Transport};

const BUDGET: Duration = Duration::from_millis(50);

type Responses = Arc<Mutex<Vec<(u16, Vec<u8>)>>>;

fn setup() -> (Arc<MemoryTransport>, HttpDriver, HttpDriver) {
    let transport = Arc::new(MemoryTransport::new());
    transport.listen("example.com", 80);
    let client = HttpDriver::plain(transport.clone(), HttpConfig::default());
    let server = HttpDriver::plain(transport.clone(), HttpConfig::default());
    (transport, client, server)
}

fn get(url: &str, responses: &Responses) -> HttpMessage {
    let mut request = HttpMessage::from_url(Method::GET, url).unwrap();
    let sink = responses.clone();
    request.set_callback(move |response| {
        sink.lock()
            .unwrap()
            .push((response.status().as_u16(), response.body().to_vec()));
    });
    request
}

/// Send the queued request and return (client socket, server socket).
fn send_request(transport: &MemoryTransport, client: &HttpDriver) -> (SocketId, SocketId) {
    client.process_outbound_messages(BUDGET).unwrap();
    let server_socket = transport.accept("example.com", 80).unwrap();
    let client_socket = client.pending_sockets()[0];
    (client_socket, server_socket)
}

fn drain(transport: &MemoryTransport, driver: &HttpDriver, socket: SocketId) {
    while transport.pending(socket) > 0 {
        driver.read(socket).unwrap();
    }
}

#[test]
fn test_request_response_over_memory_transport() {
    let (transport, client, server) = setup();
    let responses = Responses::default();

    client.push_out_message(get("http://example.com/hello", &responses)).unwrap();
    let (client_socket, server_socket) = send_request(&transport, &client);
    assert_eq!(client.outbound_count(), 1);

    server.read(server_socket).unwrap();
    let request = server.next_request().unwrap();
    assert_eq!(request.method(), Method::GET);
    assert_eq!(request.path(), "/hello");
    assert_eq!(request.header("host"), Some("example.com"));
    assert!(request.header("user-agent").unwrap().starts_with("wirelink/"));
    assert_eq!(request.socket(), Some(server_socket));
    assert!(server.pending_sockets().is_empty());

    let response = HttpMessage::response(&request, "hello", StatusCode::Ok);
    server.push_out_message(response).unwrap();
    server.process_outbound_messages(BUDGET).unwrap();

    client.read(client_socket).unwrap();
    assert_eq!(*responses.lock().unwrap(), vec![(200, b"hello".to_vec())]);
    assert!(client.pending_sockets().is_empty());
    assert_eq!(client.inbound_count(), 1);
    assert_eq!(server.inbound_count(), 1);
}

#[test]
fn test_large_response_is_chunked_and_reassembled() {
    let (transport, client, server) = setup();
    let responses = Responses::default();

    client.push_out_message(get("http://example.com/big", &responses)).unwrap();
    let (client_socket, server_socket) = send_request(&transport, &client);

    server.read(server_socket).unwrap();
    let request = server.next_request().unwrap();
    let body: Vec<u8> = (0..200_000u32).map(|i| (i % 253) as u8).collect();
    server
        .push_out_message(HttpMessage::response(&request, body.clone(), StatusCode::Ok))
        .unwrap();
    server.process_outbound_messages(BUDGET).unwrap();

    drain(&transport, &client, client_socket);
    let responses = responses.lock().unwrap();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].0, 200);
    assert_eq!(responses[0].1, body);
}

#[test]
fn test_pipelined_requests_are_split() {
    let (_transport, _client, server) = setup();
    let socket = SocketId(42);

    server
        .process_read(
            socket,
            b"GET /one HTTP/1.1\r\n\r\nPOST /two HTTP/1.1\r\nContent-Length: 3\r\n\r\nabcGET /th",
        )
        .unwrap();
    let first = server.next_request().unwrap();
    let second = server.next_request().unwrap();
    assert_eq!(first.path(), "/one");
    assert_eq!(second.path(), "/two");
    assert_eq!(second.body(), b"abc");
    assert!(server.next_request().is_none());
    assert_eq!(server.pending_sockets(), vec![socket]);

    server.process_read(socket, b"ree HTTP/1.1\r\n\r\n").unwrap();
    assert_eq!(server.next_request().unwrap().path(), "/three");
    assert!(server.pending_sockets().is_empty());
}

#[test]
fn test_server_refuses_variable_sized_request() {
    let (transport, _client, server) = setup();
    let (socket, _peer) = transport.pair();

    let err = server
        .process_read(socket, b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n")
        .unwrap_err();
    assert!(matches!(err, DriverError::VariableSized(s) if s == socket));
    assert!(server.next_request().is_none());
    assert_eq!(transport.state(socket), SocketState::Closed);
}

#[test]
fn test_server_refuses_oversized_request() {
    let transport = Arc::new(MemoryTransport::new());
    let config = HttpConfig {
        limits: MessageLimits {
            body_capacity: 4,
            ..MessageLimits::default()
        },
        ..HttpConfig::default()
    };
    let server = HttpDriver::plain(transport.clone(), config);

    let err = server
        .process_read(SocketId(9), b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\n")
        .unwrap_err();
    assert!(matches!(err, DriverError::TooLarge(_)));
}

#[test]
fn test_malformed_request_aborts_connection() {
    let (transport, _client, server) = setup();
    let (socket, _peer) = transport.pair();

    let err = server.process_read(socket, b"BREW /pot HTTP/1.1\r\n\r\n").unwrap_err();
    assert!(matches!(err, DriverError::Parse(_)));
    assert_eq!(transport.state(socket), SocketState::Closed);
    assert!(server.pending_sockets().is_empty());
}

#[test]
fn test_outbound_queue_is_bounded() {
    let transport = Arc::new(MemoryTransport::new());
    let config = HttpConfig {
        queue_capacity: 2,
        ..HttpConfig::default()
    };
    transport.listen("example.com", 80);
    let client = HttpDriver::plain(transport.clone(), config);
    let server = HttpDriver::plain(transport.clone(), HttpConfig::default());
    let responses = Responses::default();

    client.push_out_message(get("http://example.com/1", &responses)).unwrap();
    client.push_out_message(get("http://example.com/2", &responses)).unwrap();
    let rejected = client
        .push_out_message(get("http://example.com/3", &responses))
        .unwrap_err();
    assert_eq!(rejected.path(), "/3");
    assert_eq!(client.outbound_len(), 2);

    // The two accepted messages still go out whole.
    client.process_outbound_messages(BUDGET).unwrap();
    assert_eq!(client.outbound_len(), 0);
    let mut paths = Vec::new();
    while let Some(socket) = transport.accept("example.com", 80) {
        server.read(socket).unwrap();
        while let Some(request) = server.next_request() {
            assert_eq!(request.header("host"), Some("example.com"));
            paths.push(request.path().to_string());
        }
    }
    assert_eq!(paths, vec!["/1", "/2"]);
}

#[test]
fn test_parsed_request_is_forwarded_with_its_body() {
    let (transport, _client, server) = setup();
    let (socket, peer) = transport.pair();

    server
        .process_read(socket, b"POST /submit HTTP/1.1\r\nContent-Length: 4\r\n\r\nping")
        .unwrap();
    let request = server.next_request().unwrap();
    assert_eq!(request.body(), b"ping");

    server.push_out_message(request).unwrap();
    server.process_outbound_messages(BUDGET).unwrap();

    let mut buf = vec![0u8; 4096];
    let n = transport.receive(peer, &mut buf).unwrap();
    let text = String::from_utf8_lossy(&buf[..n]);
    assert!(text.starts_with("POST /submit HTTP/1.1\r\n"));
    assert!(text.contains("Content-Length: 4\r\n"));
    assert!(text.ends_with("\r\n\r\nping"));
}

#[test]
fn test_unreachable_host_reports_600() {
    let (_transport, client, _server) = setup();
    let responses = Responses::default();

    client.push_out_message(get("http://nowhere.invalid/", &responses)).unwrap();
    client.process_outbound_messages(BUDGET).unwrap();

    assert_eq!(*responses.lock().unwrap(), vec![(600, Vec::new())]);
    assert!(client.pending_sockets().is_empty());
    assert_eq!(client.outbound_len(), 0);
}

#[test]
fn test_close_before_response_reports_408_once() {
    let (transport, client, _server) = setup();
    let responses = Responses::default();

    client.push_out_message(get("http://example.com/slow", &responses)).unwrap();
    let (client_socket, server_socket) = send_request(&transport, &client);

    transport.close(server_socket);
    client.read(client_socket).unwrap();
    client.socket_closed(client_socket);

    assert_eq!(*responses.lock().unwrap(), vec![(408, Vec::new())]);
    assert!(client.pending_sockets().is_empty());
}

#[test]
fn test_expired_request_reports_408() {
    let (transport, client, _server) = setup();
    let responses = Responses::default();

    client.push_out_message(get("http://example.com/slow", &responses)).unwrap();
    let (client_socket, _server_socket) = send_request(&transport, &client);

    client.expire_pending(Duration::from_secs(60));
    assert!(responses.lock().unwrap().is_empty());

    std::thread::sleep(Duration::from_millis(5));
    client.expire_pending(Duration::from_millis(1));
    assert_eq!(*responses.lock().unwrap(), vec![(408, Vec::new())]);
    assert_eq!(transport.state(client_socket), SocketState::Closed);
}

#[test]
fn test_connecting_socket_defers_send() {
    let (transport, client, _server) = setup();
    let responses = Responses::default();
    transport.hold_connects(true);

    client.push_out_message(get("http://example.com/wait", &responses)).unwrap();
    client.process_outbound_messages(BUDGET).unwrap();
    assert_eq!(client.outbound_len(), 1);
    assert!(transport.accept("example.com", 80).is_none());

    // Still connecting: the same socket is reused, nothing is sent.
    client.process_outbound_messages(BUDGET).unwrap();
    assert_eq!(client.outbound_len(), 1);

    transport.release_connects();
    client.process_outbound_messages(BUDGET).unwrap();
    assert_eq!(client.outbound_len(), 0);
    let server_socket = transport.accept("example.com", 80).unwrap();
    assert!(transport.pending(server_socket) > 0);
    assert!(transport.accept("example.com", 80).is_none());
}

#[test]
fn test_connection_close_response_closes_socket() {
    let (transport, client, server) = setup();
    let responses = Responses::default();

    let mut request = get("http://example.com/bye", &responses);
    request.set_connection(Connection::Close);
    client.push_out_message(request).unwrap();
    let (client_socket, server_socket) = send_request(&transport, &client);

    server.read(server_socket).unwrap();
    let request = server.next_request().unwrap();
    assert_eq!(request.connection(), Connection::Close);
    server
        .push_out_message(HttpMessage::response(&request, "bye", StatusCode::Ok))
        .unwrap();
    server.process_outbound_messages(BUDGET).unwrap();
    assert_eq!(transport.state(server_socket), SocketState::Closed);

    client.read(client_socket).unwrap();
    assert_eq!(*responses.lock().unwrap(), vec![(200, b"bye".to_vec())]);
    assert_eq!(transport.state(client_socket), SocketState::Closed);
}
