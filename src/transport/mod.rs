//! Transport seam.
//!
//! The protocol drivers never touch sockets directly. They see a
//! [`Transport`] (open, receive, send, close) and a [`Link`], which is the
//! write path a driver sends through. A plain driver writes straight to the
//! transport via [`PlainLink`]; a secure driver writes through the TLS
//! adapter, which encrypts before handing bytes to the transport.
//!
//! ```text
//!   driver ──send──▶ Link ──▶ (TLS encrypt) ──▶ Transport::send_all
//!   driver ◀─process_read── (TLS decrypt) ◀── Transport::receive
//! ```

pub mod memory;
pub mod registry;
pub mod tcp;

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

pub use memory::MemoryTransport;
pub use registry::SocketMap;
pub use tcp::TcpTransport;

/// Size of one transport read. Drivers pull at most this many bytes per call.
pub const READ_CHUNK: usize = 64 * 1024;

/// Opaque identity of a transport socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(pub u64);

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a transport socket as seen by the drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// An asynchronous open is still in flight.
    Connecting,
    /// Ready for reads and writes.
    Connected,
    /// The open failed (unreachable host, refused, timed out).
    Failed,
    /// Closed or never existed.
    Closed,
}

/// Byte transport consumed by the drivers.
///
/// `receive` returns `Ok(0)` at end of stream and an error of kind
/// [`io::ErrorKind::WouldBlock`] when no bytes are available yet.
pub trait Transport: Send + Sync {
    /// Start opening a socket to `host:port`. The socket is usable once
    /// [`Transport::state`] reports [`SocketState::Connected`].
    fn connect(&self, host: &str, port: u16) -> io::Result<SocketId>;

    fn state(&self, socket: SocketId) -> SocketState;

    fn receive(&self, socket: SocketId, buf: &mut [u8]) -> io::Result<usize>;

    /// Write every byte or fail. Returns the number of bytes written.
    fn send_all(&self, socket: SocketId, data: &[u8]) -> io::Result<usize>;

    /// Ask the transport to close the socket once pending writes drain.
    fn mark_closable(&self, socket: SocketId);

    fn is_valid(&self, socket: SocketId) -> bool {
        matches!(
            self.state(socket),
            SocketState::Connecting | SocketState::Connected
        )
    }

    fn remote_addr(&self, socket: SocketId) -> Option<SocketAddr>;

    /// Host name the socket was opened with, if it was opened by `connect`.
    fn remote_host(&self, socket: SocketId) -> Option<String>;
}

/// Write path of a driver.
///
/// `send` returns `Ok(0)` when the link cannot take bytes yet (for example a
/// TLS handshake is still running). The caller re-queues its work and tries
/// again on its next tick.
pub trait Link: Send + Sync {
    fn transport(&self) -> &dyn Transport;

    fn send(&self, socket: SocketId, data: &[u8]) -> io::Result<usize>;
}

/// Link that writes straight to the transport.
#[derive(Clone)]
pub struct PlainLink {
    transport: Arc<dyn Transport>,
}

impl PlainLink {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

impl Link for PlainLink {
    fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    fn send(&self, socket: SocketId, data: &[u8]) -> io::Result<usize> {
        match self.transport.state(socket) {
            SocketState::Connecting => Ok(0),
            _ => self.transport.send_all(socket, data),
        }
    }
}

/// Split `host[:port]` into its parts, falling back to `default_port`.
pub fn split_host_port(authority: &str, default_port: u16) -> (&str, u16) {
    // IPv6 literals keep their brackets and may carry their own port.
    if let Some(rest) = authority.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            let host = &authority[..end + 2];
            let port = rest[end + 1..]
                .strip_prefix(':')
                .and_then(|p| p.parse().ok())
                .unwrap_or(default_port);
            return (host, port);
        }
        return (authority, default_port);
    }

    match authority.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => (host, port),
            Err(_) => (authority, default_port),
        },
        None => (authority, default_port),
    }
}
