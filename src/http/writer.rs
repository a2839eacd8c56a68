use bytes::BytesMut;

use crate::http::flags::{CacheControl, Connection, ContentEncoding, TransferEncoding, Upgrade};
use crate::http::message::HttpMessage;

const HTTP_VERSION: &str = "HTTP/1.1";

/// Framing around one chunk: size line CRLF plus the CRLF after the data.
const CHUNK_FRAMING: usize = 4;
const TERMINAL_CHUNK: &[u8] = b"0\r\n\r\n";

fn hex_digits(mut n: usize) -> usize {
    let mut digits = 1;
    while n >= 16 {
        n >>= 4;
        digits += 1;
    }
    digits
}

fn push_header(buf: &mut Vec<u8>, name: &str, value: &str) {
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(b": ");
    buf.extend_from_slice(value.as_bytes());
    buf.extend_from_slice(b"\r\n");
}

impl HttpMessage {
    fn render_headers(&self, agent: Option<&str>) -> Vec<u8> {
        let mut buf = Vec::with_capacity(256);

        // Start line
        let start_line = if self.is_request() {
            format!("{} {} {}\r\n", self.method().as_str(), self.path, HTTP_VERSION)
        } else {
            format!(
                "{} {} {}\r\n",
                HTTP_VERSION,
                self.status.as_u16(),
                self.status.reason_phrase()
            )
        };
        buf.extend_from_slice(start_line.as_bytes());

        for (name, value) in self.headers.iter() {
            push_header(&mut buf, name, value);
        }

        let bodyless = !self.is_request() && self.status.forbids_body();
        if self.transfer_encoding() == TransferEncoding::Chunked {
            push_header(&mut buf, "Transfer-Encoding", "chunked");
        } else if !bodyless {
            push_header(&mut buf, "Content-Length", &self.body.len().to_string());
        }

        if let Some(agent) = agent {
            let name = if self.is_request() { "User-Agent" } else { "Server" };
            if self.headers.get(name).is_none() {
                push_header(&mut buf, name, agent);
            }
        }

        if self.websocket_version != 0 {
            push_header(&mut buf, "Sec-WebSocket-Version", &self.websocket_version.to_string());
        }

        if self.upgrade() == Upgrade::WebSocket {
            push_header(&mut buf, "Upgrade", "websocket");
        }
        push_header(&mut buf, "Connection", self.connection().as_str());

        if let (Connection::KeepAlive, Some(params)) = (self.connection(), self.keep_alive) {
            push_header(
                &mut buf,
                "Keep-Alive",
                &format!("timeout={}, max={}", params.timeout, params.max),
            );
        }

        let directive = self.flags.cache_control().as_str();
        match (self.max_age, directive) {
            (Some(age), Some(name)) => {
                push_header(&mut buf, "Cache-Control", &format!("max-age={}, {}", age, name))
            }
            (Some(age), None) => push_header(&mut buf, "Cache-Control", &format!("max-age={}", age)),
            (None, Some(name)) => push_header(&mut buf, "Cache-Control", name),
            (None, None) => {}
        }

        if self.content_encoding() != ContentEncoding::Identity {
            push_header(&mut buf, "Content-Encoding", self.content_encoding().as_str());
        }

        // Header/body separator
        buf.extend_from_slice(b"\r\n");
        buf
    }

    /// Writes the start line and headers into `out`.
    ///
    /// If the body does not fit in what is left of `capacity` after the
    /// headers, the message switches to chunked transfer encoding before the
    /// headers are written. Callers should re-check the returned size
    /// against their I/O buffer.
    pub fn serialize_headers(&mut self, out: &mut BytesMut, capacity: usize, agent: Option<&str>) -> usize {
        let mut head = self.render_headers(agent);

        if self.transfer_encoding() == TransferEncoding::Identity
            && !(!self.is_request() && self.status.forbids_body())
            && head.len().saturating_add(self.body.len()) > capacity
        {
            tracing::debug!(
                socket = ?self.socket,
                body = self.body.len(),
                capacity,
                "body exceeds buffer, switching to chunked"
            );
            self.flags.set_transfer_encoding(TransferEncoding::Chunked);
            head = self.render_headers(agent);
        }

        out.extend_from_slice(&head);
        head.len()
    }

    /// Writes the next piece of the body, at most `capacity` bytes including
    /// chunk framing. The call that writes the last chunked byte also writes
    /// the terminal chunk when it fits; otherwise the next call does.
    pub fn serialize_body(&mut self, out: &mut BytesMut, capacity: usize) -> usize {
        let remaining = self.body.len() - self.chunk_offset.min(self.body.len());

        if self.transfer_encoding() == TransferEncoding::Identity {
            let n = remaining.min(capacity);
            out.extend_from_slice(&self.body[self.chunk_offset..self.chunk_offset + n]);
            self.chunk_offset += n;
            return n;
        }

        if self.flags.terminal_written() {
            return 0;
        }

        let mut written = 0;
        if remaining > 0 {
            let framing = CHUNK_FRAMING + hex_digits(remaining.min(capacity));
            let n = remaining.min(capacity.saturating_sub(framing));
            if n > 0 {
                let size_line = format!("{:x}\r\n", n);
                out.extend_from_slice(size_line.as_bytes());
                out.extend_from_slice(&self.body[self.chunk_offset..self.chunk_offset + n]);
                out.extend_from_slice(b"\r\n");
                self.chunk_offset += n;
                written += size_line.len() + n + 2;
            }
        }

        if self.chunk_offset == self.body.len() && capacity - written >= TERMINAL_CHUNK.len() {
            out.extend_from_slice(TERMINAL_CHUNK);
            self.flags.set_terminal_written(true);
            written += TERMINAL_CHUNK.len();
        }

        written
    }

    /// Start the body over from its first byte. A message that was parsed
    /// off the wire has its offset at the end of the body.
    pub(crate) fn rewind_body(&mut self) {
        self.chunk_offset = 0;
        self.flags.set_terminal_written(false);
    }

    /// Serializes the whole message in one buffer.
    pub fn to_bytes(&mut self, agent: Option<&str>) -> BytesMut {
        let mut out = BytesMut::new();
        self.rewind_body();
        self.serialize_headers(&mut out, usize::MAX, agent);
        while !self.is_body_sent() {
            if self.serialize_body(&mut out, usize::MAX) == 0 {
                break;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::flags::Method;
    use crate::http::status::StatusCode;

    #[test]
    fn hex_digit_count() {
        assert_eq!(hex_digits(0), 1);
        assert_eq!(hex_digits(15), 1);
        assert_eq!(hex_digits(16), 2);
        assert_eq!(hex_digits(0x1000), 4);
    }

    #[test]
    fn status_line_and_content_length() {
        let request = HttpMessage::request(Method::GET, "/");
        let mut response = HttpMessage::response(&request, "hi", StatusCode::NotFound);
        let bytes = response.to_bytes(Some("wirelink"));
        let text = String::from_utf8_lossy(&bytes);

        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.contains("Server: wirelink\r\n"));
        assert!(text.ends_with("\r\n\r\nhi"));
    }

    #[test]
    fn cache_control_combines_age_and_directive() {
        let mut msg = HttpMessage::request(Method::GET, "/");
        msg.set_cache_control(CacheControl::NoCache, Some(60));
        let text = String::from_utf8(msg.to_bytes(None).to_vec()).unwrap();
        assert!(text.contains("Cache-Control: max-age=60, no-cache\r\n"));
    }
}
