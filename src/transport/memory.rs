//! In-process transport.
//!
//! Sockets are byte pipes inside one process. A listener is registered per
//! `host:port`; `connect` to a registered address produces a connected pair
//! whose server half waits in the listener's backlog until `accept`.
//! Connecting to an address nobody listens on fails, which is how tests
//! exercise the "domain did not respond" path. `hold_connects` keeps new
//! sockets in [`SocketState::Connecting`] until `release_connects`.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Buf, BytesMut};
use parking_lot::Mutex;

use crate::transport::{SocketId, SocketState, Transport};

struct Endpoint {
    peer: Option<SocketId>,
    inbox: BytesMut,
    state: SocketState,
    peer_closed: bool,
    host: Option<String>,
    target: Option<(String, u16)>,
}

impl Endpoint {
    fn new(state: SocketState, host: Option<String>) -> Self {
        Self {
            peer: None,
            inbox: BytesMut::new(),
            state,
            peer_closed: false,
            host,
            target: None,
        }
    }
}

#[derive(Default)]
struct Inner {
    endpoints: HashMap<SocketId, Endpoint>,
    listeners: HashMap<(String, u16), VecDeque<SocketId>>,
    hold_connects: bool,
    held: Vec<SocketId>,
}

#[derive(Default)]
pub struct MemoryTransport {
    next_id: AtomicU64,
    inner: Mutex<Inner>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&self) -> SocketId {
        SocketId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Accept connections addressed to `host:port`.
    pub fn listen(&self, host: &str, port: u16) {
        self.inner
            .lock()
            .listeners
            .entry((host.to_string(), port))
            .or_default();
    }

    /// Pop the next server-side socket connected to `host:port`.
    pub fn accept(&self, host: &str, port: u16) -> Option<SocketId> {
        self.inner
            .lock()
            .listeners
            .get_mut(&(host.to_string(), port))
            .and_then(|backlog| backlog.pop_front())
    }

    /// Create an already connected pair without going through a listener.
    pub fn pair(&self) -> (SocketId, SocketId) {
        let a = self.allocate();
        let b = self.allocate();
        let mut inner = self.inner.lock();
        Self::link(&mut inner, a, Endpoint::new(SocketState::Connected, None), b);
        (a, b)
    }

    /// Keep sockets opened from now on in `Connecting` until released.
    pub fn hold_connects(&self, hold: bool) {
        self.inner.lock().hold_connects = hold;
    }

    /// Complete every held connect.
    pub fn release_connects(&self) {
        let mut inner = self.inner.lock();
        let held = std::mem::take(&mut inner.held);
        for socket in held {
            self.finish_connect(&mut inner, socket);
        }
    }

    /// Close a socket as if the peer hung up.
    pub fn close(&self, socket: SocketId) {
        self.mark_closable(socket);
    }

    /// Sockets that are still open or opening, in creation order.
    pub fn sockets(&self) -> Vec<SocketId> {
        let inner = self.inner.lock();
        let mut open: Vec<SocketId> = inner
            .endpoints
            .iter()
            .filter(|(_, e)| matches!(e.state, SocketState::Connecting | SocketState::Connected))
            .map(|(id, _)| *id)
            .collect();
        open.sort();
        open
    }

    /// Bytes waiting to be received on `socket`.
    pub fn pending(&self, socket: SocketId) -> usize {
        self.inner
            .lock()
            .endpoints
            .get(&socket)
            .map_or(0, |e| e.inbox.len())
    }

    fn link(inner: &mut Inner, a: SocketId, mut first: Endpoint, b: SocketId) {
        first.peer = Some(b);
        let mut second = Endpoint::new(SocketState::Connected, None);
        second.peer = Some(a);
        inner.endpoints.insert(a, first);
        inner.endpoints.insert(b, second);
    }

    fn finish_connect(&self, inner: &mut Inner, socket: SocketId) {
        let Some(endpoint) = inner.endpoints.get_mut(&socket) else {
            return;
        };
        let Some(target) = endpoint.target.take() else {
            return;
        };

        if !inner.listeners.contains_key(&target) {
            endpoint.state = SocketState::Failed;
            tracing::debug!(socket = %socket, host = %target.0, port = target.1, "memory connect refused");
            return;
        }

        let server = self.allocate();
        endpoint.state = SocketState::Connected;
        endpoint.peer = Some(server);

        let mut accepted = Endpoint::new(SocketState::Connected, None);
        accepted.peer = Some(socket);
        inner.endpoints.insert(server, accepted);
        if let Some(backlog) = inner.listeners.get_mut(&target) {
            backlog.push_back(server);
        }
    }
}

impl Transport for MemoryTransport {
    fn connect(&self, host: &str, port: u16) -> io::Result<SocketId> {
        let socket = self.allocate();
        let mut inner = self.inner.lock();

        let mut endpoint = Endpoint::new(SocketState::Connecting, Some(host.to_string()));
        endpoint.target = Some((host.to_string(), port));
        inner.endpoints.insert(socket, endpoint);

        if inner.hold_connects {
            inner.held.push(socket);
        } else {
            self.finish_connect(&mut inner, socket);
        }
        Ok(socket)
    }

    fn state(&self, socket: SocketId) -> SocketState {
        self.inner
            .lock()
            .endpoints
            .get(&socket)
            .map_or(SocketState::Closed, |e| e.state)
    }

    fn receive(&self, socket: SocketId, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock();
        let endpoint = inner
            .endpoints
            .get_mut(&socket)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;

        if !endpoint.inbox.is_empty() {
            let n = endpoint.inbox.len().min(buf.len());
            buf[..n].copy_from_slice(&endpoint.inbox[..n]);
            endpoint.inbox.advance(n);
            return Ok(n);
        }

        match endpoint.state {
            SocketState::Connecting => Err(io::ErrorKind::WouldBlock.into()),
            SocketState::Failed | SocketState::Closed => Ok(0),
            SocketState::Connected if endpoint.peer_closed => Ok(0),
            SocketState::Connected => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    fn send_all(&self, socket: SocketId, data: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock();
        let endpoint = inner
            .endpoints
            .get(&socket)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;

        if endpoint.state != SocketState::Connected || endpoint.peer_closed {
            return Err(io::ErrorKind::BrokenPipe.into());
        }

        let peer = endpoint
            .peer
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        let target = inner
            .endpoints
            .get_mut(&peer)
            .ok_or_else(|| io::Error::from(io::ErrorKind::BrokenPipe))?;
        target.inbox.extend_from_slice(data);
        Ok(data.len())
    }

    fn mark_closable(&self, socket: SocketId) {
        let mut inner = self.inner.lock();
        let peer = match inner.endpoints.get_mut(&socket) {
            Some(endpoint) => {
                endpoint.state = SocketState::Closed;
                endpoint.peer
            }
            None => None,
        };
        if let Some(peer) = peer.and_then(|p| inner.endpoints.get_mut(&p)) {
            peer.peer_closed = true;
        }
    }

    fn remote_addr(&self, _socket: SocketId) -> Option<SocketAddr> {
        None
    }

    fn remote_host(&self, socket: SocketId) -> Option<String> {
        self.inner
            .lock()
            .endpoints
            .get(&socket)
            .and_then(|e| e.host.clone())
    }
}
