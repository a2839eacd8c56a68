//! TCP transport backed by tokio.
//!
//! Opens run as tokio tasks bounded by a connect timeout; once a stream is
//! established it is converted to a non-blocking std stream so the drivers
//! can read and write synchronously from their polling loop.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::time::timeout;

use crate::transport::{SocketId, SocketMap, SocketState, Transport};

/// Upper bound for one blocking `send_all`.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

struct TcpSlot {
    state: SocketState,
    stream: Option<TcpStream>,
    host: Option<String>,
    peer: Option<SocketAddr>,
}

pub struct TcpTransport {
    runtime: Handle,
    next_id: AtomicU64,
    slots: Arc<SocketMap<Mutex<TcpSlot>>>,
    connect_timeout: Duration,
}

impl TcpTransport {
    pub fn new(runtime: Handle, connect_timeout: Duration) -> Self {
        Self {
            runtime,
            next_id: AtomicU64::new(0),
            slots: Arc::new(SocketMap::new()),
            connect_timeout,
        }
    }

    fn allocate(&self) -> SocketId {
        SocketId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Adopt a stream accepted by a listener.
    pub fn register(&self, stream: tokio::net::TcpStream) -> io::Result<SocketId> {
        let stream = stream.into_std()?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr().ok();

        let socket = self.allocate();
        self.slots.insert(
            socket,
            Mutex::new(TcpSlot {
                state: SocketState::Connected,
                stream: Some(stream),
                host: None,
                peer,
            }),
        );
        Ok(socket)
    }

    /// Sockets that are still open or opening.
    pub fn sockets(&self) -> Vec<SocketId> {
        self.slots
            .sockets()
            .into_iter()
            .filter(|s| self.is_valid(*s))
            .collect()
    }

    /// Forget sockets that have been closed or failed.
    pub fn reap(&self) -> Vec<SocketId> {
        let dead: Vec<SocketId> = self
            .slots
            .sockets()
            .into_iter()
            .filter(|s| !self.is_valid(*s))
            .collect();
        for socket in &dead {
            self.slots.remove(*socket);
        }
        dead
    }
}

impl Transport for TcpTransport {
    fn connect(&self, host: &str, port: u16) -> io::Result<SocketId> {
        let socket = self.allocate();
        self.slots.insert(
            socket,
            Mutex::new(TcpSlot {
                state: SocketState::Connecting,
                stream: None,
                host: Some(host.to_string()),
                peer: None,
            }),
        );

        let slots = self.slots.clone();
        let host = host.to_string();
        let limit = self.connect_timeout;
        self.runtime.spawn(async move {
            let outcome = match timeout(limit, tokio::net::TcpStream::connect((host.as_str(), port))).await {
                Ok(Ok(stream)) => stream.into_std().and_then(|s| {
                    s.set_nodelay(true)?;
                    Ok(s)
                }),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(io::ErrorKind::TimedOut.into()),
            };

            let Some(slot) = slots.get(socket) else {
                return;
            };
            let mut slot = slot.lock();
            match outcome {
                Ok(stream) => {
                    tracing::debug!(socket = %socket, host = %host, port, "connected");
                    slot.peer = stream.peer_addr().ok();
                    slot.stream = Some(stream);
                    slot.state = SocketState::Connected;
                }
                Err(e) => {
                    tracing::warn!(socket = %socket, host = %host, port, error = %e, "connect failed");
                    slot.state = SocketState::Failed;
                }
            }
        });

        Ok(socket)
    }

    fn state(&self, socket: SocketId) -> SocketState {
        self.slots
            .get(socket)
            .map_or(SocketState::Closed, |slot| slot.lock().state)
    }

    fn receive(&self, socket: SocketId, buf: &mut [u8]) -> io::Result<usize> {
        let slot = self
            .slots
            .get(socket)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        let mut slot = slot.lock();
        match slot.state {
            SocketState::Connecting => return Err(io::ErrorKind::WouldBlock.into()),
            SocketState::Failed | SocketState::Closed => return Ok(0),
            SocketState::Connected => {}
        }
        match slot.stream.as_mut() {
            Some(stream) => stream.read(buf),
            None => Ok(0),
        }
    }

    fn send_all(&self, socket: SocketId, data: &[u8]) -> io::Result<usize> {
        let slot = self
            .slots
            .get(socket)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        let mut slot = slot.lock();
        let stream = slot
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;

        stream.set_nonblocking(false)?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
        let written = stream.write_all(data);
        stream.set_nonblocking(true)?;
        written.map(|_| data.len())
    }

    fn mark_closable(&self, socket: SocketId) {
        if let Some(slot) = self.slots.get(socket) {
            let mut slot = slot.lock();
            if let Some(mut stream) = slot.stream.take() {
                let _ = stream.flush();
                let _ = stream.shutdown(Shutdown::Both);
            }
            slot.state = SocketState::Closed;
        }
    }

    fn remote_addr(&self, socket: SocketId) -> Option<SocketAddr> {
        self.slots.get(socket).and_then(|slot| slot.lock().peer)
    }

    fn remote_host(&self, socket: SocketId) -> Option<String> {
        self.slots.get(socket).and_then(|slot| slot.lock().host.clone())
    }
}
