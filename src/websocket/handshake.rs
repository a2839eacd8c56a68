//! The HTTP upgrade exchange that opens a WebSocket connection.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha1::{Digest, Sha1};

use crate::http::flags::{Connection, Method, Upgrade};
use crate::http::message::HttpMessage;
use crate::http::status::StatusCode;
use crate::transport::SocketId;

pub const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
pub const VERSION: u8 = 13;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,

    #[error("unsupported websocket version {0}")]
    UnsupportedVersion(u8),

    #[error("request is not a websocket upgrade")]
    NotUpgrade,

    #[error("client did not offer sub-protocol {0:?}")]
    ProtocolMismatch(String),

    #[error("expected 101 Switching Protocols, got {0}")]
    UnexpectedStatus(u16),

    #[error("missing Sec-WebSocket-Accept header")]
    MissingAccept,

    #[error("Sec-WebSocket-Accept does not match the key sent")]
    AcceptMismatch,

    #[error("invalid websocket url: {0}")]
    InvalidUrl(String),
}

/// `base64(SHA1(key + GUID))`.
pub fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.trim().as_bytes());
    sha1.update(GUID.as_bytes());
    STANDARD.encode(sha1.finalize())
}

/// A fresh `Sec-WebSocket-Key`: 16 random bytes, base64.
pub fn generate_key() -> String {
    let mut nonce = [0u8; 16];
    fastrand::fill(&mut nonce);
    STANDARD.encode(nonce)
}

/// Check an upgrade request on the server side and return the client key.
///
/// With `protocol` set, the client's `Sec-WebSocket-Protocol` list must
/// contain it.
pub fn validate_request(
    request: &HttpMessage,
    protocol: Option<&str>,
) -> Result<String, HandshakeError> {
    if request.upgrade() != Upgrade::WebSocket || request.connection() != Connection::Upgrade {
        return Err(HandshakeError::NotUpgrade);
    }
    if request.websocket_version() != VERSION {
        return Err(HandshakeError::UnsupportedVersion(request.websocket_version()));
    }
    let key = request
        .header("sec-websocket-key")
        .filter(|key| !key.is_empty())
        .ok_or(HandshakeError::MissingKey)?;

    if let Some(wanted) = protocol {
        let offered = request.header("sec-websocket-protocol").unwrap_or_default();
        if !offered.split(',').any(|p| p.trim() == wanted) {
            return Err(HandshakeError::ProtocolMismatch(wanted.to_string()));
        }
    }
    Ok(key.to_string())
}

/// Check the server's reply to our upgrade request.
pub fn validate_response(response: &HttpMessage, key: &str) -> Result<(), HandshakeError> {
    if response.status() != StatusCode::SwitchingProtocols {
        return Err(HandshakeError::UnexpectedStatus(response.status().as_u16()));
    }
    let accept = response
        .header("sec-websocket-accept")
        .ok_or(HandshakeError::MissingAccept)?;
    if accept != accept_key(key) {
        return Err(HandshakeError::AcceptMismatch);
    }
    Ok(())
}

/// The client's upgrade request.
pub fn upgrade_request(
    host: &str,
    path: &str,
    origin: Option<&str>,
    key: &str,
    protocols: &[String],
) -> HttpMessage {
    let mut request = HttpMessage::request(Method::GET, path);
    request.push_header("Host", host);
    if let Some(origin) = origin {
        request.push_header("Origin", origin);
    }
    request.push_header("Sec-WebSocket-Key", key);
    if !protocols.is_empty() {
        request.push_header("Sec-WebSocket-Protocol", &protocols.join(", "));
    }
    request.set_upgrade(Upgrade::WebSocket);
    request.set_connection(Connection::Upgrade);
    request.set_websocket_version(VERSION);
    request
}

/// The server's `101 Switching Protocols` reply.
pub fn switching_response(socket: SocketId, key: &str, protocol: Option<&str>) -> HttpMessage {
    let mut response = HttpMessage::default();
    response.set_status(StatusCode::SwitchingProtocols);
    response.set_socket(Some(socket));
    response.push_header("Sec-WebSocket-Accept", &accept_key(key));
    if let Some(protocol) = protocol {
        response.push_header("Sec-WebSocket-Protocol", protocol);
    }
    response.set_upgrade(Upgrade::WebSocket);
    response.set_connection(Connection::Upgrade);
    response
}
