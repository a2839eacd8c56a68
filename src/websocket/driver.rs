//! WebSocket connection orchestration.
//!
//! Bytes from a socket the driver has never seen are an upgrade request
//! (server role). Once it validates, a [`WebConnection`] is created and a
//! [`Packet::Connect`] marker is queued; draining that marker sends the
//! `101` reply. [`WebSocketDriver::open_socket`] does the same for the
//! client role, where the marker sends the upgrade request and the `101`
//! arrives through `process_read`.
//!
//! Handlers are always invoked with no driver lock held.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;

use crate::driver::{DriverError, MessageDriver};
use crate::http::message::{HttpMessage, MessageLimits};
use crate::transport::{Link, PlainLink, READ_CHUNK, SocketId, SocketMap, SocketState, Transport};
use crate::websocket::connection::{ConnectState, WebConnection, WebSocketHandler};
use crate::websocket::frame::{DEFAULT_MAX_MESSAGE_SIZE, FrameError, Opcode, WebFrame, is_control_byte};
use crate::websocket::handshake::{self, HandshakeError};

#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Applied to the upgrade request/response.
    pub limits: MessageLimits,
    pub queue_capacity: usize,
    pub agent: Option<String>,
    /// Sub-protocol a server requires, or a client offers.
    pub protocol: Option<String>,
    pub origin: Option<String>,
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            limits: MessageLimits::default(),
            queue_capacity: 1024,
            agent: Some(concat!("wirelink/", env!("CARGO_PKG_VERSION")).to_string()),
            protocol: None,
            origin: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Unit of outbound work.
#[derive(Debug, Clone)]
pub enum Packet {
    /// Send the handshake for this socket. Never reaches the wire as a frame.
    Connect(SocketId),
    Frame { socket: SocketId, frame: WebFrame },
}

impl Packet {
    pub fn socket(&self) -> SocketId {
        match self {
            Packet::Connect(socket) => *socket,
            Packet::Frame { socket, .. } => *socket,
        }
    }
}

struct Outbound {
    packet: Packet,
    /// Serialized bytes the link has not accepted yet.
    pending: BytesMut,
}

/// Upgrade request still being read on the server side.
struct PendingUpgrade {
    request: HttpMessage,
    carry: BytesMut,
}

enum Progress {
    Done,
    Blocked,
}

pub struct WebSocketDriver {
    link: Arc<dyn Link>,
    config: WebSocketConfig,
    handler: Arc<dyn WebSocketHandler>,
    connections: SocketMap<Mutex<WebConnection>>,
    upgrades: SocketMap<Mutex<PendingUpgrade>>,
    outbound: ArrayQueue<Outbound>,
    /// Blocked head of the outbound queue, retried first.
    stalled: Mutex<Option<Outbound>>,
    inbound_count: AtomicU64,
    outbound_count: AtomicU64,
}

impl WebSocketDriver {
    /// `handler` serves accepted connections and clients opened without
    /// their own handler.
    pub fn new(
        link: Arc<dyn Link>,
        config: WebSocketConfig,
        handler: Arc<dyn WebSocketHandler>,
    ) -> Self {
        let capacity = config.queue_capacity.max(1);
        Self {
            link,
            handler,
            connections: SocketMap::new(),
            upgrades: SocketMap::new(),
            outbound: ArrayQueue::new(capacity),
            stalled: Mutex::new(None),
            inbound_count: AtomicU64::new(0),
            outbound_count: AtomicU64::new(0),
            config,
        }
    }

    pub fn plain(
        transport: Arc<dyn Transport>,
        config: WebSocketConfig,
        handler: Arc<dyn WebSocketHandler>,
    ) -> Self {
        Self::new(Arc::new(PlainLink::new(transport)), config, handler)
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }

    fn transport(&self) -> &dyn Transport {
        self.link.transport()
    }

    pub fn connection_state(&self, socket: SocketId) -> Option<ConnectState> {
        self.connections.get(socket).map(|conn| conn.lock().state())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Messages received (control frames included).
    pub fn inbound_count(&self) -> u64 {
        self.inbound_count.load(Ordering::Relaxed)
    }

    /// Frames sent (handshakes excluded).
    pub fn outbound_count(&self) -> u64 {
        self.outbound_count.load(Ordering::Relaxed)
    }

    /// Packets waiting to be sent.
    pub fn outbound_len(&self) -> usize {
        self.outbound.len() + usize::from(self.stalled.lock().is_some())
    }

    /// Open a client connection to `host:port` and queue its upgrade request.
    pub fn open_socket(&self, host: &str, port: u16, path: &str) -> Result<SocketId, DriverError> {
        self.open_socket_with(host, port, path, self.handler.clone())
    }

    pub fn open_socket_with(
        &self,
        host: &str,
        port: u16,
        path: &str,
        handler: Arc<dyn WebSocketHandler>,
    ) -> Result<SocketId, DriverError> {
        let socket = self.transport().connect(host, port)?;
        let authority = match port {
            80 | 443 => host.to_string(),
            _ => format!("{}:{}", host, port),
        };

        let connection = WebConnection::client(
            socket,
            &authority,
            path,
            self.config.origin.clone(),
            handshake::generate_key(),
            self.config.protocol.iter().cloned().collect(),
            handler,
            self.config.limits,
            self.config.max_message_size,
        );
        self.connections.insert(socket, Mutex::new(connection));

        if self.outbound.push(Outbound::new(Packet::Connect(socket))).is_err() {
            tracing::warn!(socket = %socket, "outbound queue full, abandoning connect");
            self.connections.remove(socket);
            self.transport().mark_closable(socket);
            return Err(DriverError::QueueFull("outbound"));
        }

        tracing::info!(socket = %socket, host = %authority, path, "opening websocket");
        Ok(socket)
    }

    /// Open a client connection from a `ws://` or `wss://` URL.
    pub fn open_url(&self, url: &str) -> Result<SocketId, DriverError> {
        let parsed = url::Url::parse(url).map_err(|e| HandshakeError::InvalidUrl(e.to_string()))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(HandshakeError::InvalidUrl(format!("unsupported scheme {}", parsed.scheme())).into());
        }
        let host = parsed
            .host_str()
            .ok_or_else(|| HandshakeError::InvalidUrl("missing host".to_string()))?;
        let port = parsed.port_or_known_default().unwrap_or(80);

        let mut path = parsed.path().to_string();
        if let Some(query) = parsed.query() {
            path.push('?');
            path.push_str(query);
        }
        self.open_socket(host, port, &path)
    }

    /// Queue a packet. A full queue hands it back.
    pub fn push_out_packet(&self, packet: Packet) -> Result<(), Packet> {
        self.outbound.push(Outbound::new(packet)).map_err(|rejected| {
            tracing::warn!(capacity = self.outbound.capacity(), "outbound queue full");
            rejected.packet
        })
    }

    pub fn send_text(&self, socket: SocketId, text: &str) -> Result<(), Packet> {
        self.push_out_packet(Packet::Frame {
            socket,
            frame: WebFrame::text(text),
        })
    }

    pub fn send_binary(&self, socket: SocketId, payload: &[u8]) -> Result<(), Packet> {
        self.push_out_packet(Packet::Frame {
            socket,
            frame: WebFrame::binary(payload),
        })
    }

    /// Queue a close frame; the socket closes once it is sent.
    pub fn close(&self, socket: SocketId, code: u16, reason: &str) -> Result<(), Packet> {
        if let Some(conn) = self.connections.get(socket) {
            conn.lock().close_sent = true;
        }
        self.push_out_packet(Packet::Frame {
            socket,
            frame: WebFrame::close(Some(code), reason),
        })
    }

    pub fn read(&self, socket: SocketId) -> Result<(), DriverError> {
        let mut buf = vec![0u8; READ_CHUNK];
        match self.transport().receive(socket, &mut buf) {
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(()),
            Ok(0) => {
                tracing::debug!(socket = %socket, "end of stream");
                let result = self.process_read(socket, &[]);
                self.transport().mark_closable(socket);
                result
            }
            Err(e) => {
                tracing::debug!(socket = %socket, error = %e, "receive failed");
                let result = self.process_read(socket, &[]);
                self.transport().mark_closable(socket);
                result
            }
            Ok(n) => {
                tracing::trace!(socket = %socket, bytes = n, "received");
                self.process_read(socket, &buf[..n])
            }
        }
    }

    /// Process bytes for `socket`; any handshake or framing error closes it.
    pub fn process_read(&self, socket: SocketId, data: &[u8]) -> Result<(), DriverError> {
        match self.process_read_message(socket, data) {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!(socket = %socket, error = %e, "aborting websocket");
                self.abort(socket);
                Err(e)
            }
        }
    }

    fn process_read_message(&self, socket: SocketId, data: &[u8]) -> Result<(), DriverError> {
        if data.is_empty() {
            self.socket_closed(socket);
            return Ok(());
        }
        match self.connections.get(socket) {
            Some(conn) => self.process_connection(socket, &conn, data),
            None => self.process_upgrade(socket, data),
        }
    }

    /// Server role: read an upgrade request.
    fn process_upgrade(&self, socket: SocketId, data: &[u8]) -> Result<(), DriverError> {
        let limits = self.config.limits;
        let entry = self.upgrades.get_or_insert_with(socket, || {
            Mutex::new(PendingUpgrade {
                request: HttpMessage::inbound(socket, limits),
                carry: BytesMut::new(),
            })
        });

        let (request, key, leftover) = {
            let mut guard = entry.lock();
            let PendingUpgrade { request, carry } = &mut *guard;
            carry.extend_from_slice(data);
            let n = request.deserialize_headers(&carry[..], false)?;
            carry.advance(n);
            if !request.is_headers_read() {
                return Ok(());
            }
            let key = handshake::validate_request(request, self.config.protocol.as_deref())?;
            (std::mem::take(request), key, carry.split())
        };
        self.upgrades.remove(socket);

        let connection = WebConnection::server(
            socket,
            &request,
            key,
            self.config.protocol.clone(),
            self.handler.clone(),
            self.config.max_message_size,
        );
        self.connections.insert(socket, Mutex::new(connection));
        tracing::info!(socket = %socket, path = %request.path(), "websocket upgrade accepted");

        if self.outbound.push(Outbound::new(Packet::Connect(socket))).is_err() {
            return Err(DriverError::QueueFull("outbound"));
        }

        if leftover.is_empty() {
            return Ok(());
        }
        match self.connections.get(socket) {
            Some(conn) => self.process_connection(socket, &conn, &leftover),
            None => Ok(()),
        }
    }

    fn process_connection(
        &self,
        socket: SocketId,
        conn: &Mutex<WebConnection>,
        data: &[u8],
    ) -> Result<(), DriverError> {
        let mut frames = Vec::new();
        let mut connected = false;

        let handler = {
            let mut guard = conn.lock();
            let connection = &mut *guard;
            let leftover;
            let mut data = data;

            if connection.state == ConnectState::ConnectingClient {
                connection.carry.extend_from_slice(data);
                let n = connection.response.deserialize_headers(&connection.carry, false)?;
                connection.carry.advance(n);
                if !connection.response.is_headers_read() {
                    return Ok(());
                }
                handshake::validate_response(&connection.response, &connection.key)?;
                connection.state = connection.state.connected();
                connection.response = HttpMessage::default();
                connected = true;
                leftover = connection.carry.split();
                data = &leftover[..];
                tracing::info!(socket = %socket, "websocket connected");
            }

            read_frames(connection, data, &mut frames)?;
            connection.handler.clone()
        };

        if connected {
            handler.on_connected(self, socket);
        }
        for frame in frames {
            self.dispatch(socket, &handler, frame);
        }
        Ok(())
    }

    fn dispatch(&self, socket: SocketId, handler: &Arc<dyn WebSocketHandler>, frame: WebFrame) {
        self.inbound_count.fetch_add(1, Ordering::Relaxed);
        match frame.opcode() {
            Opcode::Ping => {
                tracing::trace!(socket = %socket, "ping");
                let pong = Packet::Frame {
                    socket,
                    frame: WebFrame::pong(frame.payload()),
                };
                if self.push_out_packet(pong).is_err() {
                    tracing::warn!(socket = %socket, "dropping pong");
                }
            }
            Opcode::Pong => tracing::trace!(socket = %socket, "pong"),
            Opcode::Close => self.close_received(socket, &frame),
            _ => {
                tracing::debug!(socket = %socket, opcode = ?frame.opcode(), len = frame.len(), "message received");
                handler.on_received(self, socket, &frame);
            }
        }
    }

    fn close_received(&self, socket: SocketId, frame: &WebFrame) {
        tracing::debug!(socket = %socket, code = ?frame.close_code(), "close received");
        let reply = match self.connections.get(socket) {
            Some(conn) => {
                let mut guard = conn.lock();
                guard.close_received = true;
                !std::mem::replace(&mut guard.close_sent, true)
            }
            None => false,
        };

        if !reply {
            self.close_connection(socket);
            return;
        }
        let echo = Packet::Frame {
            socket,
            frame: WebFrame::close(frame.close_code(), ""),
        };
        if self.push_out_packet(echo).is_err() {
            self.close_connection(socket);
        }
    }

    /// Drain the outbound queue for at most `budget`, returning early when a
    /// socket is still connecting or the link is not writable.
    pub fn process_outbound_packets(&self, budget: Duration) -> Result<(), DriverError> {
        let deadline = Instant::now() + budget;

        loop {
            let next = self.stalled.lock().take().or_else(|| self.outbound.pop());
            let Some(mut outbound) = next else {
                break;
            };
            match self.send_packet(&mut outbound) {
                Progress::Done => {}
                Progress::Blocked => {
                    *self.stalled.lock() = Some(outbound);
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                break;
            }
        }
        Ok(())
    }

    fn send_packet(&self, outbound: &mut Outbound) -> Progress {
        let socket = outbound.packet.socket();
        let Some(conn) = self.connections.get(socket) else {
            tracing::debug!(socket = %socket, "connection gone, dropping packet");
            return Progress::Done;
        };

        match self.transport().state(socket) {
            SocketState::Connecting => return Progress::Blocked,
            SocketState::Failed | SocketState::Closed => {
                tracing::warn!(socket = %socket, "socket not connected, dropping connection");
                self.close_connection(socket);
                return Progress::Done;
            }
            SocketState::Connected => {}
        }

        if outbound.pending.is_empty() {
            let guard = conn.lock();
            match &outbound.packet {
                Packet::Connect(_) => {
                    if guard.state.is_connected() {
                        return Progress::Done;
                    }
                    let mut message = if guard.state.is_client() {
                        handshake::upgrade_request(
                            &guard.host,
                            &guard.path,
                            guard.origin.as_deref(),
                            &guard.key,
                            &guard.protocols,
                        )
                    } else {
                        handshake::switching_response(
                            socket,
                            &guard.key,
                            guard.protocols.first().map(String::as_str),
                        )
                    };
                    outbound.pending = message.to_bytes(self.config.agent.as_deref());
                }
                Packet::Frame { frame, .. } => {
                    if !guard.state.is_connected() {
                        return Progress::Blocked;
                    }
                    frame.serialize(&mut outbound.pending, guard.next_mask());
                }
            }
        }

        match self.link.send(socket, &outbound.pending) {
            Ok(0) => return Progress::Blocked,
            Ok(n) => tracing::trace!(socket = %socket, bytes = n, "sent"),
            Err(e) => {
                tracing::warn!(socket = %socket, error = %e, "send failed");
                self.close_connection(socket);
                return Progress::Done;
            }
        }
        outbound.pending.clear();

        match &outbound.packet {
            Packet::Connect(_) => {
                let accepted = {
                    let mut guard = conn.lock();
                    if guard.state.is_client() {
                        None
                    } else {
                        guard.state = guard.state.connected();
                        Some(guard.handler.clone())
                    }
                };
                if let Some(handler) = accepted {
                    tracing::info!(socket = %socket, "websocket connected");
                    handler.on_connected(self, socket);
                }
            }
            Packet::Frame { frame, .. } => {
                self.outbound_count.fetch_add(1, Ordering::Relaxed);
                if frame.opcode() == Opcode::Close {
                    tracing::debug!(socket = %socket, "close sent");
                    self.close_connection(socket);
                }
            }
        }
        Progress::Done
    }

    /// Forget `socket`, firing `on_closed` if a connection existed.
    fn drop_connection(&self, socket: SocketId) -> bool {
        self.upgrades.remove(socket);
        let Some(conn) = self.connections.remove(socket) else {
            return false;
        };
        let handler = conn.lock().handler.clone();
        tracing::info!(socket = %socket, "websocket closed");
        handler.on_closed(socket);
        true
    }

    fn close_connection(&self, socket: SocketId) {
        self.drop_connection(socket);
        self.transport().mark_closable(socket);
    }

    fn abort(&self, socket: SocketId) {
        let upgrading = self.upgrades.contains(socket);
        if !self.drop_connection(socket) && upgrading {
            self.handler.on_closed(socket);
        }
        self.transport().mark_closable(socket);
    }

    pub fn socket_closed(&self, socket: SocketId) {
        self.drop_connection(socket);
    }
}

impl Outbound {
    fn new(packet: Packet) -> Self {
        Self {
            packet,
            pending: BytesMut::new(),
        }
    }
}

/// Feed `data` into the connection's frames, collecting finished messages.
/// A control frame that starts between fragments goes to the separate
/// control slot so the fragmented message keeps accumulating.
fn read_frames(
    connection: &mut WebConnection,
    data: &[u8],
    finished: &mut Vec<WebFrame>,
) -> Result<(), FrameError> {
    let mut offset = 0;
    while offset < data.len() {
        let rest = &data[offset..];
        let to_control = connection.control.in_progress()
            || (connection.frame.at_boundary() && is_control_byte(rest[0]));
        let slot = if to_control {
            &mut connection.control
        } else {
            &mut connection.frame
        };

        let n = slot.deserialize(rest)?;
        offset += n;
        if slot.is_complete() {
            finished.push(slot.take());
        } else if n == 0 {
            break;
        }
    }
    Ok(())
}

impl MessageDriver for WebSocketDriver {
    fn read(&self, socket: SocketId) -> Result<(), DriverError> {
        WebSocketDriver::read(self, socket)
    }

    fn process_read(&self, socket: SocketId, data: &[u8]) -> Result<(), DriverError> {
        WebSocketDriver::process_read(self, socket, data)
    }

    fn process_outbound(&self, budget: Duration) -> Result<(), DriverError> {
        self.process_outbound_packets(budget)
    }

    fn socket_closed(&self, socket: SocketId) {
        WebSocketDriver::socket_closed(self, socket)
    }
}
