use std::sync::Arc;

use bytes::BytesMut;

use crate::http::message::{HttpMessage, MessageLimits};
use crate::transport::SocketId;
use crate::websocket::driver::WebSocketDriver;
use crate::websocket::frame::WebFrame;

/// Application side of a WebSocket connection.
///
/// Callbacks run on the thread that drives the socket, after the driver has
/// released its own locks, so they may push packets back through `driver`.
pub trait WebSocketHandler: Send + Sync {
    fn on_connected(&self, _driver: &WebSocketDriver, _socket: SocketId) {}

    /// A complete text or binary message arrived.
    fn on_received(&self, driver: &WebSocketDriver, socket: SocketId, frame: &WebFrame);

    fn on_closed(&self, _socket: SocketId) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
    ConnectingClient,
    ConnectingServer,
    ConnectedClient,
    ConnectedServer,
}

impl ConnectState {
    pub fn is_client(&self) -> bool {
        matches!(self, ConnectState::ConnectingClient | ConnectState::ConnectedClient)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectState::ConnectedClient | ConnectState::ConnectedServer)
    }

    /// Connecting states only move to their connected counterpart.
    pub(crate) fn connected(self) -> Self {
        match self {
            ConnectState::ConnectingClient => ConnectState::ConnectedClient,
            ConnectState::ConnectingServer => ConnectState::ConnectedServer,
            other => other,
        }
    }
}

/// One WebSocket connection bound to one transport socket.
pub struct WebConnection {
    pub(crate) socket: SocketId,
    pub(crate) host: String,
    pub(crate) path: String,
    pub(crate) origin: Option<String>,
    pub(crate) key: String,
    /// Offered by a client, or the one negotiated by a server.
    pub(crate) protocols: Vec<String>,
    pub(crate) state: ConnectState,
    /// Message being reassembled.
    pub(crate) frame: WebFrame,
    /// Control frame arriving between fragments of `frame`.
    pub(crate) control: WebFrame,
    pub(crate) handler: Arc<dyn WebSocketHandler>,
    /// Client only: the upgrade response being parsed.
    pub(crate) response: HttpMessage,
    pub(crate) carry: BytesMut,
    pub(crate) close_sent: bool,
    pub(crate) close_received: bool,
}

impl WebConnection {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn client(
        socket: SocketId,
        host: &str,
        path: &str,
        origin: Option<String>,
        key: String,
        protocols: Vec<String>,
        handler: Arc<dyn WebSocketHandler>,
        limits: MessageLimits,
        max_message_size: usize,
    ) -> Self {
        Self {
            socket,
            host: host.to_string(),
            path: path.to_string(),
            origin,
            key,
            protocols,
            state: ConnectState::ConnectingClient,
            frame: Self::blank_frame(socket, max_message_size),
            control: Self::blank_frame(socket, max_message_size),
            handler,
            response: HttpMessage::inbound(socket, limits),
            carry: BytesMut::new(),
            close_sent: false,
            close_received: false,
        }
    }

    pub(crate) fn server(
        socket: SocketId,
        request: &HttpMessage,
        key: String,
        protocol: Option<String>,
        handler: Arc<dyn WebSocketHandler>,
        max_message_size: usize,
    ) -> Self {
        Self {
            socket,
            host: request.header("host").unwrap_or_default().to_string(),
            path: request.path().to_string(),
            origin: request.header("origin").map(str::to_string),
            key,
            protocols: protocol.into_iter().collect(),
            state: ConnectState::ConnectingServer,
            frame: Self::blank_frame(socket, max_message_size),
            control: Self::blank_frame(socket, max_message_size),
            handler,
            response: HttpMessage::default(),
            carry: BytesMut::new(),
            close_sent: false,
            close_received: false,
        }
    }

    fn blank_frame(socket: SocketId, max_message_size: usize) -> WebFrame {
        let mut frame = WebFrame::new(max_message_size);
        frame.set_socket(Some(socket));
        frame
    }

    pub fn socket(&self) -> SocketId {
        self.socket
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    pub fn protocols(&self) -> &[String] {
        &self.protocols
    }

    pub fn state(&self) -> ConnectState {
        self.state
    }

    /// Mask for the next outbound frame: clients mask, servers do not.
    pub(crate) fn next_mask(&self) -> Option<[u8; 4]> {
        self.state.is_client().then(|| fastrand::u32(..).to_ne_bytes())
    }
}
