//! Typed message attributes and their packed representation.
//!
//! Every enumerated attribute of a message lives in one `u32`, each in its
//! own fixed-width bit range:
//!
//! ```text
//!  bits  0..4   method
//!  bits  4..6   connection
//!  bits  6..9   cache-control directive
//!  bit   9      transfer-encoding (chunked)
//!  bits 10..13  content-encoding
//!  bit  13      upgrade (websocket)
//!  bit  14      headers read
//!  bit  15      content too large
//!  bit  16      body complete
//!  bit  17      terminal chunk written
//!  bit  18      status line / request line seen
//! ```

/// HTTP request methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    /// GET - Retrieve a resource
    #[default]
    GET,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// CONNECT - Open a tunnel
    CONNECT,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// TRACE - Loop the request back
    TRACE,
    /// PATCH - Partial modification of a resource
    PATCH,
}

impl Method {
    /// Parses an HTTP method from a string.
    ///
    /// Method tokens are case-sensitive.
    ///
    /// ```
    /// # use wirelink::http::flags::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("get"), None);
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::GET),
            "HEAD" => Some(Method::HEAD),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "DELETE" => Some(Method::DELETE),
            "CONNECT" => Some(Method::CONNECT),
            "OPTIONS" => Some(Method::OPTIONS),
            "TRACE" => Some(Method::TRACE),
            "PATCH" => Some(Method::PATCH),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::HEAD => "HEAD",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::CONNECT => "CONNECT",
            Method::OPTIONS => "OPTIONS",
            Method::TRACE => "TRACE",
            Method::PATCH => "PATCH",
        }
    }

    const ALL: [Method; 9] = [
        Method::GET,
        Method::HEAD,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::CONNECT,
        Method::OPTIONS,
        Method::TRACE,
        Method::PATCH,
    ];
}

/// What happens to the connection after this message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Connection {
    Close,
    #[default]
    KeepAlive,
    Upgrade,
}

impl Connection {
    /// Interprets a `Connection` header value, which is a comma list.
    /// `upgrade` wins over `close`, which wins over `keep-alive`.
    pub fn from_header(value: &str) -> Option<Self> {
        let mut found = None;
        for token in value.split(',').map(str::trim) {
            if token.eq_ignore_ascii_case("upgrade") {
                return Some(Connection::Upgrade);
            } else if token.eq_ignore_ascii_case("close") {
                found = Some(Connection::Close);
            } else if token.eq_ignore_ascii_case("keep-alive") && found.is_none() {
                found = Some(Connection::KeepAlive);
            }
        }
        found
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Connection::Close => "close",
            Connection::KeepAlive => "keep-alive",
            Connection::Upgrade => "Upgrade",
        }
    }

    const ALL: [Connection; 3] = [Connection::Close, Connection::KeepAlive, Connection::Upgrade];
}

/// Named `Cache-Control` directive. `max-age` is carried separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheControl {
    #[default]
    Unset,
    NoCache,
    NoStore,
    Public,
    Private,
    MustRevalidate,
}

impl CacheControl {
    pub fn from_directive(directive: &str) -> Option<Self> {
        const NAMED: [(&str, CacheControl); 5] = [
            ("no-cache", CacheControl::NoCache),
            ("no-store", CacheControl::NoStore),
            ("public", CacheControl::Public),
            ("private", CacheControl::Private),
            ("must-revalidate", CacheControl::MustRevalidate),
        ];
        NAMED
            .iter()
            .find(|(name, _)| directive.eq_ignore_ascii_case(name))
            .map(|(_, class)| *class)
    }

    pub fn as_str(&self) -> Option<&'static str> {
        match self {
            CacheControl::Unset => None,
            CacheControl::NoCache => Some("no-cache"),
            CacheControl::NoStore => Some("no-store"),
            CacheControl::Public => Some("public"),
            CacheControl::Private => Some("private"),
            CacheControl::MustRevalidate => Some("must-revalidate"),
        }
    }

    const ALL: [CacheControl; 6] = [
        CacheControl::Unset,
        CacheControl::NoCache,
        CacheControl::NoStore,
        CacheControl::Public,
        CacheControl::Private,
        CacheControl::MustRevalidate,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferEncoding {
    #[default]
    Identity,
    Chunked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentEncoding {
    #[default]
    Identity,
    Gzip,
    Compress,
    Deflate,
    Br,
}

impl ContentEncoding {
    pub fn from_header(value: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .find(|e| value.trim().eq_ignore_ascii_case(e.as_str()))
            .copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentEncoding::Identity => "identity",
            ContentEncoding::Gzip => "gzip",
            ContentEncoding::Compress => "compress",
            ContentEncoding::Deflate => "deflate",
            ContentEncoding::Br => "br",
        }
    }

    const ALL: [ContentEncoding; 5] = [
        ContentEncoding::Identity,
        ContentEncoding::Gzip,
        ContentEncoding::Compress,
        ContentEncoding::Deflate,
        ContentEncoding::Br,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Upgrade {
    #[default]
    None,
    WebSocket,
}

const METHOD: (u32, u32) = (0, 4);
const CONNECTION: (u32, u32) = (4, 2);
const CACHE: (u32, u32) = (6, 3);
const CHUNKED: u32 = 1 << 9;
const ENCODING: (u32, u32) = (10, 3);
const UPGRADE: u32 = 1 << 13;
const HEADERS_READ: u32 = 1 << 14;
const TOO_LARGE: u32 = 1 << 15;
const BODY_DONE: u32 = 1 << 16;
const TERMINAL_WRITTEN: u32 = 1 << 17;
const START_LINE: u32 = 1 << 18;

/// All enumerated attributes of one message packed into a single word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageFlags(u32);

impl Default for MessageFlags {
    fn default() -> Self {
        let mut flags = MessageFlags(0);
        flags.set_connection(Connection::KeepAlive);
        flags
    }
}

impl MessageFlags {
    fn field(&self, (shift, width): (u32, u32)) -> usize {
        ((self.0 >> shift) & ((1 << width) - 1)) as usize
    }

    fn set_field(&mut self, (shift, width): (u32, u32), value: usize) {
        let mask = ((1u32 << width) - 1) << shift;
        self.0 = (self.0 & !mask) | (((value as u32) << shift) & mask);
    }

    fn bit(&self, bit: u32) -> bool {
        self.0 & bit != 0
    }

    fn set_bit(&mut self, bit: u32, on: bool) {
        if on {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn method(&self) -> Method {
        Method::ALL[self.field(METHOD).min(Method::ALL.len() - 1)]
    }

    pub fn set_method(&mut self, method: Method) {
        let index = Method::ALL.iter().position(|m| *m == method).unwrap_or(0);
        self.set_field(METHOD, index);
    }

    pub fn connection(&self) -> Connection {
        Connection::ALL[self.field(CONNECTION).min(Connection::ALL.len() - 1)]
    }

    pub fn set_connection(&mut self, connection: Connection) {
        let index = Connection::ALL.iter().position(|c| *c == connection).unwrap_or(1);
        self.set_field(CONNECTION, index);
    }

    pub fn cache_control(&self) -> CacheControl {
        CacheControl::ALL[self.field(CACHE).min(CacheControl::ALL.len() - 1)]
    }

    pub fn set_cache_control(&mut self, class: CacheControl) {
        let index = CacheControl::ALL.iter().position(|c| *c == class).unwrap_or(0);
        self.set_field(CACHE, index);
    }

    pub fn transfer_encoding(&self) -> TransferEncoding {
        if self.bit(CHUNKED) {
            TransferEncoding::Chunked
        } else {
            TransferEncoding::Identity
        }
    }

    pub fn set_transfer_encoding(&mut self, encoding: TransferEncoding) {
        self.set_bit(CHUNKED, encoding == TransferEncoding::Chunked);
    }

    pub fn content_encoding(&self) -> ContentEncoding {
        ContentEncoding::ALL[self.field(ENCODING).min(ContentEncoding::ALL.len() - 1)]
    }

    pub fn set_content_encoding(&mut self, encoding: ContentEncoding) {
        let index = ContentEncoding::ALL.iter().position(|e| *e == encoding).unwrap_or(0);
        self.set_field(ENCODING, index);
    }

    pub fn upgrade(&self) -> Upgrade {
        if self.bit(UPGRADE) {
            Upgrade::WebSocket
        } else {
            Upgrade::None
        }
    }

    pub fn set_upgrade(&mut self, upgrade: Upgrade) {
        self.set_bit(UPGRADE, upgrade == Upgrade::WebSocket);
    }

    pub fn headers_read(&self) -> bool {
        self.bit(HEADERS_READ)
    }

    pub fn set_headers_read(&mut self, on: bool) {
        self.set_bit(HEADERS_READ, on);
    }

    pub fn too_large(&self) -> bool {
        self.bit(TOO_LARGE)
    }

    pub fn set_too_large(&mut self, on: bool) {
        self.set_bit(TOO_LARGE, on);
    }

    pub fn body_done(&self) -> bool {
        self.bit(BODY_DONE)
    }

    pub fn set_body_done(&mut self, on: bool) {
        self.set_bit(BODY_DONE, on);
    }

    pub fn terminal_written(&self) -> bool {
        self.bit(TERMINAL_WRITTEN)
    }

    pub fn set_terminal_written(&mut self, on: bool) {
        self.set_bit(TERMINAL_WRITTEN, on);
    }

    pub fn start_line_seen(&self) -> bool {
        self.bit(START_LINE)
    }

    pub fn set_start_line_seen(&mut self, on: bool) {
        self.set_bit(START_LINE, on);
    }
}
