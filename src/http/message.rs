//! One HTTP request or response.
//!
//! A message is either built programmatically for sending (see
//! [`HttpMessage::request`], [`HttpMessage::from_url`],
//! [`HttpMessage::response`]) or created as an empty inbound shell bound to a
//! socket and filled incrementally by the parser. Wire (de)serialization
//! lives in `parser.rs` and `writer.rs`.

use std::borrow::Cow;
use std::fmt;
use std::io::Read;
use std::sync::Arc;

use flate2::read::{GzDecoder, ZlibDecoder};

use crate::http::flags::{
    CacheControl, Connection, ContentEncoding, MessageFlags, Method, TransferEncoding, Upgrade,
};
use crate::http::headers::HeaderTable;
use crate::http::parser::ParseError;
use crate::http::status::StatusCode;
use crate::transport::SocketId;

/// Invoked when a message completes (response received, connect failed,
/// timed out).
pub type MessageCallback = Arc<dyn Fn(&HttpMessage) + Send + Sync>;

/// Capacities applied while a message is parsed from the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageLimits {
    pub max_headers: usize,
    pub header_bytes: usize,
    pub body_capacity: usize,
}

impl Default for MessageLimits {
    fn default() -> Self {
        Self {
            max_headers: 64,
            header_bytes: 16 * 1024,
            body_capacity: 1024 * 1024,
        }
    }
}

/// `Keep-Alive` parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeepAlive {
    pub timeout: u32,
    pub max: u32,
}

/// Where the chunked-body parser is within the current chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum ChunkPhase {
    #[default]
    Size,
    Data,
    DataEnd,
    Trailers,
    Done,
}

#[derive(Clone)]
pub struct HttpMessage {
    pub(crate) flags: MessageFlags,
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderTable,
    pub(crate) body: Vec<u8>,
    pub(crate) limits: MessageLimits,
    pub(crate) content_length: Option<usize>,
    /// Body bytes already written (outbound) or consumed from the wire (inbound).
    pub(crate) chunk_offset: usize,
    /// Bytes left in the chunk currently being parsed.
    pub(crate) chunk_remaining: usize,
    pub(crate) chunk_phase: ChunkPhase,
    pub(crate) version: (u8, u8),
    pub(crate) websocket_version: u8,
    pub(crate) max_age: Option<u32>,
    pub(crate) keep_alive: Option<KeepAlive>,
    pub(crate) path: String,
    pub(crate) port: Option<u16>,
    pub(crate) callback: Option<MessageCallback>,
    pub(crate) socket: Option<SocketId>,
}

impl Default for HttpMessage {
    fn default() -> Self {
        Self::with_limits(MessageLimits::default())
    }
}

impl fmt::Debug for HttpMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpMessage")
            .field("method", &self.method())
            .field("status", &self.status)
            .field("path", &self.path)
            .field("headers", &self.headers.len())
            .field("body", &self.body.len())
            .field("content_length", &self.content_length)
            .field("socket", &self.socket)
            .finish()
    }
}

impl HttpMessage {
    pub fn with_limits(limits: MessageLimits) -> Self {
        Self {
            flags: MessageFlags::default(),
            status: StatusCode::Request,
            headers: HeaderTable::new(limits.max_headers, limits.header_bytes),
            body: Vec::new(),
            limits,
            content_length: None,
            chunk_offset: 0,
            chunk_remaining: 0,
            chunk_phase: ChunkPhase::Size,
            version: (1, 1),
            websocket_version: 0,
            max_age: None,
            keep_alive: None,
            path: "/".to_string(),
            port: None,
            callback: None,
            socket: None,
        }
    }

    pub fn request(method: Method, path: impl Into<String>) -> Self {
        let mut msg = Self::default();
        msg.flags.set_method(method);
        msg.path = path.into();
        msg
    }

    /// Builds a request for an absolute URL: sets `Host`, the path and
    /// query, and remembers the port to connect to.
    pub fn from_url(method: Method, url: &str) -> Result<Self, url::ParseError> {
        let url = url::Url::parse(url)?;
        let host = url.host_str().ok_or(url::ParseError::EmptyHost)?;

        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }

        let mut msg = Self::request(method, path);
        let authority = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        msg.push_header("Host", &authority);
        msg.port = url.port_or_known_default();
        Ok(msg)
    }

    /// An empty shell the parser fills from `socket`.
    pub fn inbound(socket: SocketId, limits: MessageLimits) -> Self {
        let mut msg = Self::with_limits(limits);
        msg.socket = Some(socket);
        msg
    }

    /// A response to `request`, sent on the socket the request arrived on.
    pub fn response(request: &HttpMessage, body: impl Into<Vec<u8>>, status: StatusCode) -> Self {
        let mut msg = Self::default();
        msg.status = status;
        msg.socket = request.socket;
        msg.flags.set_connection(match request.connection() {
            Connection::Close => Connection::Close,
            _ => Connection::KeepAlive,
        });
        msg.set_body(body);
        msg
    }

    pub fn method(&self) -> Method {
        self.flags.method()
    }

    pub fn set_method(&mut self, method: Method) {
        self.flags.set_method(method);
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn is_request(&self) -> bool {
        self.status == StatusCode::Request
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn set_path(&mut self, path: impl Into<String>) {
        self.path = path.into();
    }

    pub fn version(&self) -> (u8, u8) {
        self.version
    }

    /// Port remembered from [`HttpMessage::from_url`].
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn set_port(&mut self, port: u16) {
        self.port = Some(port);
    }

    /// Appends a header. Fails once the header table or its buffer is full.
    pub fn push_header(&mut self, name: &str, value: &str) -> bool {
        self.headers.push(name, value)
    }

    /// Case-insensitive lookup; the last pushed duplicate wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn headers(&self) -> &HeaderTable {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Replaces the outbound body and its length.
    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        self.body = body.into();
        self.content_length = Some(self.body.len());
        self.chunk_offset = 0;
        self.flags.set_terminal_written(false);
    }

    /// Declared length, or the buffered length when none was declared.
    pub fn content_length(&self) -> usize {
        self.content_length.unwrap_or(self.body.len())
    }

    pub fn declared_content_length(&self) -> Option<usize> {
        self.content_length
    }

    pub fn chunk_offset(&self) -> usize {
        self.chunk_offset
    }

    pub fn connection(&self) -> Connection {
        self.flags.connection()
    }

    pub fn set_connection(&mut self, connection: Connection) {
        self.flags.set_connection(connection);
    }

    pub fn cache_control(&self) -> (CacheControl, Option<u32>) {
        (self.flags.cache_control(), self.max_age)
    }

    pub fn set_cache_control(&mut self, class: CacheControl, max_age: Option<u32>) {
        self.flags.set_cache_control(class);
        self.max_age = max_age;
    }

    pub fn keep_alive(&self) -> Option<KeepAlive> {
        self.keep_alive
    }

    pub fn set_keep_alive(&mut self, params: Option<KeepAlive>) {
        self.keep_alive = params;
    }

    pub fn transfer_encoding(&self) -> TransferEncoding {
        self.flags.transfer_encoding()
    }

    pub fn set_transfer_encoding(&mut self, encoding: TransferEncoding) {
        self.flags.set_transfer_encoding(encoding);
    }

    pub fn content_encoding(&self) -> ContentEncoding {
        self.flags.content_encoding()
    }

    pub fn set_content_encoding(&mut self, encoding: ContentEncoding) {
        self.flags.set_content_encoding(encoding);
    }

    pub fn upgrade(&self) -> Upgrade {
        self.flags.upgrade()
    }

    pub fn set_upgrade(&mut self, upgrade: Upgrade) {
        self.flags.set_upgrade(upgrade);
    }

    pub fn websocket_version(&self) -> u8 {
        self.websocket_version
    }

    pub fn set_websocket_version(&mut self, version: u8) {
        self.websocket_version = version;
    }

    pub fn flags(&self) -> MessageFlags {
        self.flags
    }

    pub fn socket(&self) -> Option<SocketId> {
        self.socket
    }

    pub fn set_socket(&mut self, socket: Option<SocketId>) {
        self.socket = socket;
    }

    pub fn set_callback(&mut self, callback: impl Fn(&HttpMessage) + Send + Sync + 'static) {
        self.callback = Some(Arc::new(callback));
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    pub(crate) fn invoke_callback(&self) {
        if let Some(callback) = &self.callback {
            callback(self);
        }
    }

    pub fn is_headers_read(&self) -> bool {
        self.flags.headers_read()
    }

    /// The declared body does not fit the body capacity.
    pub fn is_content_too_large(&self) -> bool {
        self.flags.too_large()
    }

    /// Headers and body fully received and the body fit its buffer.
    pub fn is_finished(&self) -> bool {
        self.flags.headers_read() && self.flags.body_done() && !self.flags.too_large()
    }

    /// Chunked with no declared length; a server refuses such requests.
    pub fn is_variable_sized(&self) -> bool {
        self.transfer_encoding() == TransferEncoding::Chunked && self.content_length.is_none()
    }

    /// Everything up to and including the terminal chunk has been serialized.
    pub fn is_body_sent(&self) -> bool {
        match self.transfer_encoding() {
            TransferEncoding::Chunked => self.flags.terminal_written(),
            TransferEncoding::Identity => self.chunk_offset >= self.body.len(),
        }
    }

    /// Body with its content encoding removed.
    pub fn decoded_body(&self) -> Result<Cow<'_, [u8]>, ParseError> {
        let mut out = Vec::new();
        match self.content_encoding() {
            ContentEncoding::Identity => return Ok(Cow::Borrowed(&self.body)),
            ContentEncoding::Gzip => {
                GzDecoder::new(&self.body[..]).read_to_end(&mut out)?;
            }
            ContentEncoding::Deflate => {
                ZlibDecoder::new(&self.body[..]).read_to_end(&mut out)?;
            }
            other => return Err(ParseError::UnsupportedEncoding(other)),
        }
        Ok(Cow::Owned(out))
    }

    /// Turns a sent request into the shell that receives its response.
    /// Method, path, port, socket and callback survive.
    pub(crate) fn reset_for_response(&mut self) {
        let method = self.method();
        self.flags = MessageFlags::default();
        self.flags.set_method(method);
        self.status = StatusCode::Request;
        self.headers.clear();
        self.body.clear();
        self.content_length = None;
        self.chunk_offset = 0;
        self.chunk_remaining = 0;
        self.chunk_phase = ChunkPhase::Size;
        self.websocket_version = 0;
        self.max_age = None;
        self.keep_alive = None;
    }

    /// Appends received body bytes, discarding whatever exceeds the body
    /// capacity.
    pub(crate) fn append_body(&mut self, data: &[u8]) {
        let room = self.limits.body_capacity.saturating_sub(self.body.len());
        let take = room.min(data.len());
        self.body.extend_from_slice(&data[..take]);
        if take < data.len() && !self.flags.too_large() {
            tracing::warn!(
                socket = ?self.socket,
                capacity = self.limits.body_capacity,
                "body exceeds capacity, discarding overflow"
            );
            self.flags.set_too_large(true);
        }
    }
}
