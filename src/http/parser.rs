//! Incremental HTTP/1.1 deserializer.
//!
//! Both entry points take whatever bytes are available and return how many
//! they consumed. Unconsumed bytes (a partial line, a partial chunk-size
//! line) must be offered again together with the next read. An empty slice
//! passed to [`HttpMessage::deserialize_body`] signals end of stream.

use std::io;

use crate::http::flags::{
    CacheControl, Connection, ContentEncoding, Method, TransferEncoding, Upgrade,
};
use crate::http::message::{ChunkPhase, HttpMessage, KeepAlive};
use crate::http::status::StatusCode;

/// Longest chunk-size line accepted, extensions included.
const MAX_CHUNK_LINE: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid status line")]
    InvalidStatusLine,

    #[error("invalid request line")]
    InvalidRequestLine,

    #[error("unknown method: {0}")]
    InvalidMethod(String),

    #[error("invalid http version")]
    InvalidVersion,

    #[error("invalid header line")]
    InvalidHeader,

    #[error("invalid content-length")]
    InvalidContentLength,

    #[error("header section exceeds {0} bytes")]
    HeaderTooLarge(usize),

    #[error("invalid chunk size")]
    InvalidChunkSize,

    #[error("chunk data not terminated by CRLF")]
    MissingCrlf,

    #[error("stream ended inside a chunk")]
    IncompleteChunk,

    #[error("stream ended before content-length bytes arrived")]
    UnexpectedEof,

    #[error("unsupported content encoding: {0:?}")]
    UnsupportedEncoding(ContentEncoding),

    #[error("decode error: {0}")]
    Inflate(#[from] io::Error),
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn parse_version(token: &str) -> Result<(u8, u8), ParseError> {
    let digits = token.strip_prefix("HTTP/").ok_or(ParseError::InvalidVersion)?;
    let (major, minor) = digits.split_once('.').ok_or(ParseError::InvalidVersion)?;
    let major = major.parse().map_err(|_| ParseError::InvalidVersion)?;
    let minor = minor.parse().map_err(|_| ParseError::InvalidVersion)?;
    Ok((major, minor))
}

impl HttpMessage {
    /// Feeds header bytes. Returns the bytes consumed; headers are complete
    /// once [`HttpMessage::is_headers_read`] turns true.
    ///
    /// With `trailing` set the bytes are chunked-body trailers: there is no
    /// start line and the blank line finishes the body instead.
    pub fn deserialize_headers(&mut self, buf: &[u8], trailing: bool) -> Result<usize, ParseError> {
        let mut consumed = 0;

        loop {
            let rest = &buf[consumed..];
            let Some(end) = find_crlf(rest) else {
                if rest.len() > self.limits.header_bytes {
                    tracing::warn!(socket = ?self.socket, "header line exceeds limit");
                    return Err(ParseError::HeaderTooLarge(self.limits.header_bytes));
                }
                return Ok(consumed);
            };

            let line = &rest[..end];
            consumed += end + 2;

            if line.is_empty() {
                // Stray CRLFs ahead of a start line are tolerated.
                if !trailing && !self.flags.start_line_seen() {
                    continue;
                }
                self.finish_headers(trailing);
                return Ok(consumed);
            }

            let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidHeader)?;

            if !trailing && !self.flags.start_line_seen() {
                self.parse_start_line(line)?;
                self.flags.set_start_line_seen(true);
                continue;
            }

            self.parse_header_line(line, trailing)?;
        }
    }

    fn parse_start_line(&mut self, line: &str) -> Result<(), ParseError> {
        if line.starts_with("HTTP/") {
            let mut parts = line.splitn(3, ' ');
            let version = parts.next().ok_or(ParseError::InvalidStatusLine)?;
            let code = parts.next().ok_or(ParseError::InvalidStatusLine)?;

            self.version = parse_version(version)?;
            let code: u16 = code.parse().map_err(|_| ParseError::InvalidStatusLine)?;
            if !(100..1000).contains(&code) {
                return Err(ParseError::InvalidStatusLine);
            }

            self.status = StatusCode::from_u16(code);
            if !self.status.is_known() {
                tracing::warn!(socket = ?self.socket, code, "unknown status code");
            }
            return Ok(());
        }

        let mut parts = line.splitn(3, ' ');
        let method = parts.next().ok_or(ParseError::InvalidRequestLine)?;
        let path = parts.next().ok_or(ParseError::InvalidRequestLine)?;
        let version = parts.next().ok_or(ParseError::InvalidRequestLine)?;

        let Some(method) = Method::from_str(method) else {
            tracing::warn!(socket = ?self.socket, method, "unknown method");
            return Err(ParseError::InvalidMethod(method.to_string()));
        };
        if path.is_empty() {
            return Err(ParseError::InvalidRequestLine);
        }

        self.version = parse_version(version.trim_end())?;
        self.flags.set_method(method);
        self.status = StatusCode::Request;
        self.path = path.to_string();
        Ok(())
    }

    fn parse_header_line(&mut self, line: &str, trailing: bool) -> Result<(), ParseError> {
        let (name, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;
        let name = name.trim();
        let value = value.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(ParseError::InvalidHeader);
        }

        let lower = name.to_ascii_lowercase();
        if !trailing {
            match lower.as_str() {
                "content-length" => {
                    let len = value.parse().map_err(|_| ParseError::InvalidContentLength)?;
                    self.content_length = Some(len);
                    return Ok(());
                }
                "sec-websocket-version" => {
                    self.websocket_version = value.parse().unwrap_or_else(|_| {
                        tracing::warn!(socket = ?self.socket, value, "bad sec-websocket-version");
                        0
                    });
                    return Ok(());
                }
                "connection" => {
                    match Connection::from_header(value) {
                        Some(connection) => self.flags.set_connection(connection),
                        None => tracing::debug!(socket = ?self.socket, value, "ignoring connection tokens"),
                    }
                    return Ok(());
                }
                "keep-alive" => {
                    self.keep_alive = Some(parse_keep_alive(value));
                    return Ok(());
                }
                "cache-control" => {
                    self.parse_cache_control(value);
                    return Ok(());
                }
                "transfer-encoding" => {
                    let last = value.rsplit(',').next().map(str::trim).unwrap_or_default();
                    if last.eq_ignore_ascii_case("chunked") {
                        self.flags.set_transfer_encoding(TransferEncoding::Chunked);
                    } else {
                        tracing::debug!(socket = ?self.socket, value, "treating transfer-encoding as identity");
                        self.flags.set_transfer_encoding(TransferEncoding::Identity);
                    }
                    return Ok(());
                }
                "content-encoding" => {
                    match ContentEncoding::from_header(value) {
                        Some(encoding) => self.flags.set_content_encoding(encoding),
                        None => tracing::warn!(socket = ?self.socket, value, "unknown content-encoding"),
                    }
                    return Ok(());
                }
                "upgrade" => {
                    if value
                        .split(',')
                        .any(|token| token.trim().eq_ignore_ascii_case("websocket"))
                    {
                        self.flags.set_upgrade(Upgrade::WebSocket);
                    } else {
                        tracing::warn!(socket = ?self.socket, value, "unsupported upgrade target");
                    }
                    return Ok(());
                }
                _ => {}
            }
        }

        if !self.headers.push(&lower, value) {
            tracing::warn!(socket = ?self.socket, header = %lower, "header table full, dropping header");
        }
        Ok(())
    }

    fn parse_cache_control(&mut self, value: &str) {
        for directive in value.split(',').map(str::trim) {
            if let Some(age) = directive
                .strip_prefix("max-age=")
                .or_else(|| directive.strip_prefix("MAX-AGE="))
            {
                self.max_age = age.trim_matches('"').parse().ok();
            } else if let Some(class) = CacheControl::from_directive(directive) {
                self.flags.set_cache_control(class);
            }
        }
    }

    fn finish_headers(&mut self, trailing: bool) {
        if trailing {
            self.chunk_phase = ChunkPhase::Done;
            return;
        }

        self.flags.set_headers_read(true);
        self.chunk_offset = 0;
        self.chunk_remaining = 0;
        self.chunk_phase = ChunkPhase::Size;

        if let Some(len) = self.content_length {
            if len > self.limits.body_capacity {
                tracing::warn!(
                    socket = ?self.socket,
                    content_length = len,
                    capacity = self.limits.body_capacity,
                    "declared body exceeds capacity"
                );
                self.flags.set_too_large(true);
            }
        }

        let bodyless_response = !self.is_request()
            && (self.status.forbids_body() || self.method() == Method::HEAD);
        let chunked = self.transfer_encoding() == TransferEncoding::Chunked;

        if bodyless_response {
            self.flags.set_body_done(true);
        } else if !chunked {
            match self.content_length {
                Some(0) => self.flags.set_body_done(true),
                // A request without a length has no body.
                None if self.is_request() => {
                    self.content_length = Some(0);
                    self.flags.set_body_done(true);
                }
                _ => {}
            }
        }
    }

    /// Feeds body bytes; an empty `buf` means the stream ended.
    pub fn deserialize_body(&mut self, buf: &[u8]) -> Result<usize, ParseError> {
        if !self.flags.headers_read() || self.flags.body_done() {
            return Ok(0);
        }

        if self.transfer_encoding() == TransferEncoding::Chunked {
            return self.read_chunked(buf);
        }

        let eof = buf.is_empty();
        match self.content_length {
            Some(len) => {
                if eof {
                    return Err(ParseError::UnexpectedEof);
                }
                let take = buf.len().min(len - self.chunk_offset);
                self.append_body(&buf[..take]);
                self.chunk_offset += take;
                if self.chunk_offset == len {
                    self.flags.set_body_done(true);
                }
                Ok(take)
            }
            None => {
                // Read-until-close body: end of stream fixes the length.
                if eof {
                    self.content_length = Some(self.chunk_offset);
                    self.flags.set_body_done(true);
                    return Ok(0);
                }
                self.append_body(buf);
                self.chunk_offset += buf.len();
                Ok(buf.len())
            }
        }
    }

    fn read_chunked(&mut self, buf: &[u8]) -> Result<usize, ParseError> {
        if buf.is_empty() {
            return Err(ParseError::IncompleteChunk);
        }

        let mut consumed = 0;
        loop {
            let rest = &buf[consumed..];
            match self.chunk_phase {
                ChunkPhase::Size => {
                    let Some(end) = find_crlf(rest) else {
                        if rest.len() > MAX_CHUNK_LINE {
                            return Err(ParseError::InvalidChunkSize);
                        }
                        return Ok(consumed);
                    };
                    let line = std::str::from_utf8(&rest[..end])
                        .map_err(|_| ParseError::InvalidChunkSize)?;
                    let digits = line.split(';').next().unwrap_or_default().trim();
                    let size = usize::from_str_radix(digits, 16)
                        .map_err(|_| ParseError::InvalidChunkSize)?;
                    consumed += end + 2;

                    if size == 0 {
                        self.chunk_phase = ChunkPhase::Trailers;
                    } else {
                        self.chunk_remaining = size;
                        self.chunk_phase = ChunkPhase::Data;
                    }
                }
                ChunkPhase::Data => {
                    if rest.is_empty() {
                        return Ok(consumed);
                    }
                    let take = rest.len().min(self.chunk_remaining);
                    self.append_body(&rest[..take]);
                    self.chunk_offset += take;
                    self.chunk_remaining -= take;
                    consumed += take;
                    if self.chunk_remaining == 0 {
                        self.chunk_phase = ChunkPhase::DataEnd;
                    }
                }
                ChunkPhase::DataEnd => {
                    if rest.len() < 2 {
                        return Ok(consumed);
                    }
                    if &rest[..2] != b"\r\n" {
                        return Err(ParseError::MissingCrlf);
                    }
                    consumed += 2;
                    self.chunk_phase = ChunkPhase::Size;
                }
                ChunkPhase::Trailers => {
                    consumed += self.deserialize_headers(rest, true)?;
                    if self.chunk_phase != ChunkPhase::Done {
                        return Ok(consumed);
                    }
                }
                ChunkPhase::Done => {
                    self.flags.set_body_done(true);
                    return Ok(consumed);
                }
            }
        }
    }
}

fn parse_keep_alive(value: &str) -> KeepAlive {
    let mut params = KeepAlive::default();
    for param in value.split(',').map(str::trim) {
        if let Some((key, val)) = param.split_once('=') {
            let val = val.trim().parse().unwrap_or(0);
            match key.trim().to_ascii_lowercase().as_str() {
                "timeout" => params.timeout = val,
                "max" => params.max = val,
                _ => {}
            }
        }
    }
    params
}
