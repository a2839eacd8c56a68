//! Per-connection HTTP read/write orchestration.
//!
//! Each socket with a message in flight has one [`Inbound`] entry: on a
//! server it is the request being parsed, on a client it is the sent request
//! waiting to be filled in by its response. Completed requests go onto the
//! inbound queue for [`HttpDriver::next_request`]; completed responses are
//! handed to the request's callback.
//!
//! ```text
//!   push_out_message ─▶ outbound queue ─▶ process_outbound_messages
//!        connect (if needed) ─▶ serialize ─▶ Link::send
//!                 │ request sent
//!                 ▼
//!   read ─▶ process_read ─▶ Inbound (headers ─▶ body) ─▶ callback / inbound queue
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;

use crate::driver::{DriverError, MessageDriver};
use crate::http::flags::Connection;
use crate::http::message::{HttpMessage, MessageLimits};
use crate::http::status::StatusCode;
use crate::transport::{
    Link, PlainLink, READ_CHUNK, SocketId, SocketMap, SocketState, Transport, split_host_port,
};

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub limits: MessageLimits,
    pub queue_capacity: usize,
    /// Sent as `User-Agent` on requests and `Server` on responses.
    pub agent: Option<String>,
    pub default_port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            limits: MessageLimits::default(),
            queue_capacity: 1024,
            agent: Some(concat!("wirelink/", env!("CARGO_PKG_VERSION")).to_string()),
            default_port: 80,
        }
    }
}

/// A message being received on one socket.
struct Inbound {
    message: HttpMessage,
    /// Bytes received but not yet consumed by the parser.
    carry: BytesMut,
    /// The message is a sent request waiting for its response.
    awaiting_response: bool,
    since: Instant,
}

impl Inbound {
    fn new(message: HttpMessage, awaiting_response: bool) -> Self {
        Self {
            message,
            carry: BytesMut::new(),
            awaiting_response,
            since: Instant::now(),
        }
    }
}

/// A message being sent; `pending` holds serialized bytes not yet accepted
/// by the link.
struct Outbound {
    message: HttpMessage,
    pending: BytesMut,
    headers_written: bool,
}

enum Progress {
    Done,
    Blocked,
}

pub struct HttpDriver {
    link: Arc<dyn Link>,
    config: HttpConfig,
    pending: SocketMap<Mutex<Inbound>>,
    inbound: ArrayQueue<HttpMessage>,
    outbound: ArrayQueue<Box<Outbound>>,
    /// Head of the outbound queue put back by a blocked pump; it goes first
    /// on the next tick.
    stalled: Mutex<Option<Box<Outbound>>>,
    inbound_count: AtomicU64,
    outbound_count: AtomicU64,
}

impl HttpDriver {
    pub fn new(link: Arc<dyn Link>, config: HttpConfig) -> Self {
        let capacity = config.queue_capacity.max(1);
        Self {
            link,
            pending: SocketMap::new(),
            inbound: ArrayQueue::new(capacity),
            outbound: ArrayQueue::new(capacity),
            stalled: Mutex::new(None),
            inbound_count: AtomicU64::new(0),
            outbound_count: AtomicU64::new(0),
            config,
        }
    }

    /// A driver writing straight to `transport`.
    pub fn plain(transport: Arc<dyn Transport>, config: HttpConfig) -> Self {
        Self::new(Arc::new(PlainLink::new(transport)), config)
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    fn transport(&self) -> &dyn Transport {
        self.link.transport()
    }

    /// Queue a message for sending. A full queue hands the message back.
    pub fn push_out_message(&self, message: HttpMessage) -> Result<(), HttpMessage> {
        let outbound = Box::new(Outbound {
            message,
            pending: BytesMut::new(),
            headers_written: false,
        });
        self.outbound.push(outbound).map_err(|rejected| {
            tracing::warn!(capacity = self.outbound.capacity(), "outbound queue full");
            let Outbound { message, .. } = *rejected;
            message
        })
    }

    /// Next completed inbound request, if any.
    pub fn next_request(&self) -> Option<HttpMessage> {
        self.inbound.pop()
    }

    pub fn inbound_count(&self) -> u64 {
        self.inbound_count.load(Ordering::Relaxed)
    }

    pub fn outbound_count(&self) -> u64 {
        self.outbound_count.load(Ordering::Relaxed)
    }

    /// Sockets with a message in flight.
    pub fn pending_sockets(&self) -> Vec<SocketId> {
        self.pending.sockets()
    }

    /// Messages waiting to be sent.
    pub fn outbound_len(&self) -> usize {
        self.outbound.len() + usize::from(self.stalled.lock().is_some())
    }

    /// Read one chunk from the transport and process it.
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

    /// Process bytes for `socket`; the connection is torn down on any
    /// parse error.
    pub fn process_read(&self, socket: SocketId, data: &[u8]) -> Result<(), DriverError> {
        match self.process_read_message(socket, data) {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!(socket = %socket, error = %e, "aborting connection");
                self.socket_closed(socket);
                self.transport().mark_closable(socket);
                Err(e)
            }
        }
    }

    fn process_read_message(&self, socket: SocketId, data: &[u8]) -> Result<(), DriverError> {
        let eof = data.is_empty();
        if eof && !self.pending.contains(socket) {
            return Ok(());
        }

        let limits = self.config.limits;
        let entry = self.pending.get_or_insert_with(socket, || {
            Mutex::new(Inbound::new(HttpMessage::inbound(socket, limits), false))
        });

        let mut completed = Vec::new();
        let drained = {
            let mut guard = entry.lock();
            let state = &mut *guard;
            state.carry.extend_from_slice(data);

            loop {
                if !state.message.is_headers_read() {
                    if state.carry.is_empty() {
                        break;
                    }
                    let n = state.message.deserialize_headers(&state.carry, false)?;
                    state.carry.advance(n);
                    if !state.message.is_headers_read() {
                        break;
                    }
                    if state.message.is_request() && state.message.is_variable_sized() {
                        return Err(DriverError::VariableSized(socket));
                    }
                    if state.message.is_content_too_large() {
                        return Err(DriverError::TooLarge(socket));
                    }
                    tracing::debug!(
                        socket = %socket,
                        status = state.message.status().as_u16(),
                        path = %state.message.path(),
                        "headers read"
                    );
                }

                if !state.message.flags().body_done() {
                    if state.carry.is_empty() {
                        if !eof {
                            break;
                        }
                        state.message.deserialize_body(&[])?;
                    } else {
                        let n = state.message.deserialize_body(&state.carry)?;
                        state.carry.advance(n);
                        if state.message.is_content_too_large() {
                            return Err(DriverError::TooLarge(socket));
                        }
                        if !state.message.flags().body_done() {
                            if n == 0 {
                                break;
                            }
                            continue;
                        }
                    }
                }

                // Pipelined bytes start a fresh message on the same socket.
                let next = HttpMessage::inbound(socket, limits);
                completed.push(std::mem::replace(&mut state.message, next));
                state.awaiting_response = false;
                state.since = Instant::now();
                if state.carry.is_empty() {
                    break;
                }
            }

            state.carry.is_empty()
                && !state.awaiting_response
                && !state.message.flags().start_line_seen()
        };

        // The association is cleared before any callback runs.
        if drained {
            self.pending.remove(socket);
        }

        for message in completed {
            self.complete(socket, message)?;
        }

        if eof {
            self.socket_closed(socket);
        }
        Ok(())
    }

    fn complete(&self, socket: SocketId, message: HttpMessage) -> Result<(), DriverError> {
        self.inbound_count.fetch_add(1, Ordering::Relaxed);
        let close = !message.is_request() && message.connection() == Connection::Close;

        if message.is_request() {
            tracing::info!(
                socket = %socket,
                method = ?message.method(),
                path = %message.path(),
                "request received"
            );
            message.invoke_callback();
            if self.inbound.push(message).is_err() {
                tracing::warn!(socket = %socket, capacity = self.inbound.capacity(), "inbound queue full");
                return Err(DriverError::QueueFull("inbound"));
            }
        } else {
            tracing::info!(
                socket = %socket,
                status = message.status().as_u16(),
                body = message.body().len(),
                "response received"
            );
            message.invoke_callback();
        }

        if close {
            self.transport().mark_closable(socket);
        }
        Ok(())
    }

    /// Drain the outbound queue for at most `budget`.
    ///
    /// Returns early, with the current message put back at the head of the
    /// queue, when its socket is still connecting or the link is not
    /// writable; call again on the next tick.
    pub fn process_outbound_messages(&self, budget: Duration) -> Result<(), DriverError> {
        let deadline = Instant::now() + budget;

        loop {
            let next = self.stalled.lock().take().or_else(|| self.outbound.pop());
            let Some(mut outbound) = next else {
                break;
            };
            match self.send_outbound(&mut outbound) {
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

    /// Deliver a synthesized status to the message's own callback.
    fn fail(&self, message: &mut HttpMessage, status: StatusCode) {
        message.reset_for_response();
        message.set_status(status);
        message.content_length = Some(0);
        message.invoke_callback();
    }

    fn open_socket(&self, message: &mut HttpMessage) -> Option<SocketId> {
        let Some(host) = message.header("host") else {
            tracing::warn!(path = %message.path(), "request without host header, dropping");
            return None;
        };
        let default_port = message.port().unwrap_or(self.config.default_port);
        let (name, port) = split_host_port(host, default_port);

        match self.transport().connect(name, port) {
            Ok(socket) => {
                tracing::debug!(socket = %socket, host = %name, port, "opening socket");
                message.set_socket(Some(socket));
                Some(socket)
            }
            Err(e) => {
                tracing::warn!(host = %name, port, error = %e, "connect failed");
                None
            }
        }
    }

    fn send_outbound(&self, outbound: &mut Outbound) -> Progress {
        let socket = match outbound.message.socket() {
            Some(socket) => socket,
            None if outbound.message.is_request() => match self.open_socket(&mut outbound.message) {
                Some(socket) => socket,
                None => {
                    self.fail(&mut outbound.message, StatusCode::DomainNoResponse);
                    return Progress::Done;
                }
            },
            None => {
                tracing::warn!(status = outbound.message.status().as_u16(), "response without socket, dropping");
                return Progress::Done;
            }
        };

        match self.transport().state(socket) {
            SocketState::Connecting => return Progress::Blocked,
            SocketState::Failed | SocketState::Closed => {
                tracing::warn!(socket = %socket, "socket not connected, dropping message");
                if outbound.message.is_request() {
                    self.fail(&mut outbound.message, StatusCode::DomainNoResponse);
                }
                return Progress::Done;
            }
            SocketState::Connected => {}
        }

        let agent = self.config.agent.as_deref();
        loop {
            if outbound.pending.is_empty() {
                if !outbound.headers_written {
                    outbound.message.rewind_body();
                    outbound
                        .message
                        .serialize_headers(&mut outbound.pending, READ_CHUNK, agent);
                    outbound.headers_written = true;
                    let room = READ_CHUNK.saturating_sub(outbound.pending.len());
                    outbound.message.serialize_body(&mut outbound.pending, room);
                } else if !outbound.message.is_body_sent() {
                    outbound.message.serialize_body(&mut outbound.pending, READ_CHUNK);
                } else {
                    break;
                }
                if outbound.pending.is_empty() {
                    break;
                }
            }

            match self.link.send(socket, &outbound.pending) {
                Ok(0) => return Progress::Blocked,
                Ok(n) => {
                    tracing::trace!(socket = %socket, bytes = n, "sent");
                    outbound.pending.clear();
                }
                Err(e) => {
                    tracing::warn!(socket = %socket, error = %e, "send failed");
                    self.transport().mark_closable(socket);
                    if outbound.message.is_request() {
                        self.fail(&mut outbound.message, StatusCode::DomainNoResponse);
                    }
                    return Progress::Done;
                }
            }
        }

        self.outbound_count.fetch_add(1, Ordering::Relaxed);

        if outbound.message.is_request() {
            let mut message = std::mem::take(&mut outbound.message);
            message.reset_for_response();
            message.limits = self.config.limits;
            tracing::debug!(socket = %socket, path = %message.path(), "request sent, awaiting response");
            self.pending.insert(socket, Mutex::new(Inbound::new(message, true)));
        } else if outbound.message.connection() == Connection::Close {
            tracing::debug!(socket = %socket, "response sent, closing");
            self.transport().mark_closable(socket);
        }
        Progress::Done
    }

    /// Retire messages that have waited longer than `max_age`. A request
    /// still awaiting its response observes `408` on its callback.
    pub fn expire_pending(&self, max_age: Duration) {
        for socket in self.pending.sockets() {
            let expired = self
                .pending
                .get(socket)
                .is_some_and(|entry| entry.lock().since.elapsed() > max_age);
            if expired {
                tracing::info!(socket = %socket, "message timed out");
                self.socket_closed(socket);
                self.transport().mark_closable(socket);
            }
        }
    }

    /// Flush the message bound to `socket`. A request waiting for its
    /// response gets `408` delivered to its callback exactly once.
    pub fn socket_closed(&self, socket: SocketId) {
        let Some(entry) = self.pending.remove(socket) else {
            return;
        };

        let mut message = {
            let mut state = entry.lock();
            if !state.awaiting_response {
                return;
            }
            state.awaiting_response = false;
            std::mem::take(&mut state.message)
        };
        tracing::debug!(socket = %socket, "connection closed before response");
        self.fail(&mut message, StatusCode::RequestTimeout);
    }
}

impl MessageDriver for HttpDriver {
    fn read(&self, socket: SocketId) -> Result<(), DriverError> {
        HttpDriver::read(self, socket)
    }

    fn process_read(&self, socket: SocketId, data: &[u8]) -> Result<(), DriverError> {
        HttpDriver::process_read(self, socket, data)
    }

    fn process_outbound(&self, budget: Duration) -> Result<(), DriverError> {
        self.process_outbound_messages(budget)
    }

    fn socket_closed(&self, socket: SocketId) {
        HttpDriver::socket_closed(self, socket)
    }
}
