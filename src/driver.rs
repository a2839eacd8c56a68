//! The seam between transports and protocol drivers.
//!
//! A driver is polled from an I/O thread: `read` when a socket has bytes,
//! `process_outbound` on every tick. Neither blocks. When the link is not
//! writable, or a socket is still connecting, the outbound pump re-queues its
//! work and returns; the caller's next tick resumes it.

use std::io;
use std::time::Duration;

use crate::http::parser::ParseError;
use crate::tls::adapter::TlsError;
use crate::transport::SocketId;
use crate::websocket::frame::FrameError;
use crate::websocket::handshake::HandshakeError;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("http parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("websocket frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("websocket handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("tls error: {0}")]
    Tls(#[from] TlsError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A bounded queue refused an item.
    #[error("{0} queue full")]
    QueueFull(&'static str),

    #[error("server refuses variable-sized request on {0}")]
    VariableSized(SocketId),

    #[error("message body exceeds capacity on {0}")]
    TooLarge(SocketId),
}

pub trait MessageDriver: Send + Sync {
    /// Pull available bytes for `socket` from the transport and process them.
    fn read(&self, socket: SocketId) -> Result<(), DriverError>;

    /// Process bytes that already left the transport (decrypted TLS records,
    /// for instance). An empty `data` means end of stream.
    fn process_read(&self, socket: SocketId, data: &[u8]) -> Result<(), DriverError>;

    /// Drain outbound work for at most `budget`.
    fn process_outbound(&self, budget: Duration) -> Result<(), DriverError>;

    /// The transport closed `socket`; flush whatever state it carried.
    fn socket_closed(&self, socket: SocketId);
}
