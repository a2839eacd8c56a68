//! Per-socket TLS sessions over a [`Transport`].
//!
//! The role of a session is fixed by whoever touches the socket first: a
//! read before any write makes it a server session, a write before any read
//! makes it a client session (SNI taken from the host the socket was opened
//! with). The adapter is also a [`Link`], so a driver constructed on top of
//! it sends plaintext and the adapter encrypts.

use std::io::{self, Read as _, Write as _};
use std::sync::Arc;

use parking_lot::Mutex;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, ServerConfig, ServerConnection};

use crate::transport::{Link, SocketId, SocketMap, SocketState, Transport};

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("tls: {0}")]
    Rustls(#[from] rustls::Error),

    #[error("tls io: {0}")]
    Io(#[from] io::Error),

    #[error("inbound tls on a socket without a server config")]
    NoServerConfig,

    #[error("outbound tls on a socket without a client config")]
    NoClientConfig,

    #[error("invalid server name {0:?}")]
    InvalidServerName(String),

    #[error("no certificates found in {0}")]
    NoCertificates(String),

    #[error("no private key found in {0}")]
    NoPrivateKey(String),
}

/// TLS connection kind: server (inbound) or client (outbound).
pub enum TlsConnKind {
    Server(ServerConnection),
    Client(ClientConnection),
}

impl TlsConnKind {
    fn read_tls(&mut self, rd: &mut dyn io::Read) -> io::Result<usize> {
        match self {
            TlsConnKind::Server(c) => c.read_tls(rd),
            TlsConnKind::Client(c) => c.read_tls(rd),
        }
    }

    fn write_tls(&mut self, wr: &mut dyn io::Write) -> io::Result<usize> {
        match self {
            TlsConnKind::Server(c) => c.write_tls(wr),
            TlsConnKind::Client(c) => c.write_tls(wr),
        }
    }

    fn process_new_packets(&mut self) -> Result<rustls::IoState, rustls::Error> {
        match self {
            TlsConnKind::Server(c) => c.process_new_packets(),
            TlsConnKind::Client(c) => c.process_new_packets(),
        }
    }

    fn reader(&mut self) -> rustls::Reader<'_> {
        match self {
            TlsConnKind::Server(c) => c.reader(),
            TlsConnKind::Client(c) => c.reader(),
        }
    }

    fn writer(&mut self) -> rustls::Writer<'_> {
        match self {
            TlsConnKind::Server(c) => c.writer(),
            TlsConnKind::Client(c) => c.writer(),
        }
    }

    fn wants_write(&self) -> bool {
        match self {
            TlsConnKind::Server(c) => c.wants_write(),
            TlsConnKind::Client(c) => c.wants_write(),
        }
    }

    pub fn is_handshaking(&self) -> bool {
        match self {
            TlsConnKind::Server(c) => c.is_handshaking(),
            TlsConnKind::Client(c) => c.is_handshaking(),
        }
    }

    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        match self {
            TlsConnKind::Server(c) => c.alpn_protocol(),
            TlsConnKind::Client(c) => c.alpn_protocol(),
        }
    }

    fn send_close_notify(&mut self) {
        match self {
            TlsConnKind::Server(c) => c.send_close_notify(),
            TlsConnKind::Client(c) => c.send_close_notify(),
        }
    }

    pub fn is_client(&self) -> bool {
        matches!(self, TlsConnKind::Client(_))
    }
}

/// Per-socket TLS state.
struct TlsSession {
    conn: TlsConnKind,
    handshake_complete: bool,
}

/// Outcome of feeding ciphertext into a session.
#[derive(Debug, Default)]
pub struct TlsIncoming {
    /// Decrypted application data.
    pub plaintext: Vec<u8>,
    /// The peer sent close_notify.
    pub closed: bool,
    /// This input finished the handshake.
    pub handshake_completed: bool,
}

pub struct TlsAdapter {
    transport: Arc<dyn Transport>,
    server_config: Option<Arc<ServerConfig>>,
    client_config: Option<Arc<ClientConfig>>,
    sessions: SocketMap<Mutex<TlsSession>>,
}

impl TlsAdapter {
    pub fn new(
        transport: Arc<dyn Transport>,
        server_config: Option<Arc<ServerConfig>>,
        client_config: Option<Arc<ClientConfig>>,
    ) -> Self {
        Self {
            transport,
            server_config,
            client_config,
            sessions: SocketMap::new(),
        }
    }

    pub fn transport_handle(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    fn server_session(&self, socket: SocketId) -> Result<Arc<Mutex<TlsSession>>, TlsError> {
        self.sessions.get_or_try_insert_with(socket, || {
            let config = self.server_config.clone().ok_or(TlsError::NoServerConfig)?;
            tracing::debug!(socket = %socket, "tls server session");
            Ok(Mutex::new(TlsSession {
                conn: TlsConnKind::Server(ServerConnection::new(config)?),
                handshake_complete: false,
            }))
        })
    }

    fn client_session(&self, socket: SocketId) -> Result<Arc<Mutex<TlsSession>>, TlsError> {
        self.sessions.get_or_try_insert_with(socket, || {
            let config = self.client_config.clone().ok_or(TlsError::NoClientConfig)?;
            let host = self
                .transport
                .remote_host(socket)
                .or_else(|| self.transport.remote_addr(socket).map(|a| a.ip().to_string()))
                .ok_or_else(|| TlsError::InvalidServerName(socket.to_string()))?;
            let name = host.trim_start_matches('[').trim_end_matches(']').to_string();
            let server_name = ServerName::try_from(name.clone())
                .map_err(|_| TlsError::InvalidServerName(name))?;
            tracing::debug!(socket = %socket, host = %host, "tls client session");
            Ok(Mutex::new(TlsSession {
                conn: TlsConnKind::Client(ClientConnection::new(config, server_name)?),
                handshake_complete: false,
            }))
        })
    }

    /// Write whatever the session has queued (handshake records, alerts,
    /// application records) to the transport.
    fn flush(&self, socket: SocketId, conn: &mut TlsConnKind) -> io::Result<()> {
        let mut out = Vec::new();
        while conn.wants_write() {
            if conn.write_tls(&mut out)? == 0 {
                break;
            }
        }
        if !out.is_empty() {
            tracing::trace!(socket = %socket, bytes = out.len(), "tls records out");
            self.transport.send_all(socket, &out)?;
        }
        Ok(())
    }

    /// Feed ciphertext received on `socket`. The plaintext is returned
    /// rather than delivered so the caller processes it with no session
    /// lock held.
    pub fn process_incoming(&self, socket: SocketId, ciphertext: &[u8]) -> Result<TlsIncoming, TlsError> {
        let session = self.server_session(socket)?;
        let mut guard = session.lock();
        let TlsSession {
            conn,
            handshake_complete,
        } = &mut *guard;

        let mut incoming = TlsIncoming::default();
        let mut cursor = io::Cursor::new(ciphertext);
        while (cursor.position() as usize) < ciphertext.len() {
            if conn.read_tls(&mut cursor)? == 0 {
                break;
            }
            let state = match conn.process_new_packets() {
                Ok(state) => state,
                Err(e) => {
                    // Best effort: tell the peer why.
                    let _ = self.flush(socket, conn);
                    return Err(e.into());
                }
            };

            if state.plaintext_bytes_to_read() > 0 {
                let mut reader = conn.reader();
                let mut chunk = [0u8; 16 * 1024];
                loop {
                    match reader.read(&mut chunk) {
                        Ok(0) => break,
                        Ok(n) => incoming.plaintext.extend_from_slice(&chunk[..n]),
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) => return Err(e.into()),
                    }
                }
            }
            if state.peer_has_closed() {
                incoming.closed = true;
            }
        }

        self.flush(socket, conn)?;

        if !*handshake_complete && !conn.is_handshaking() {
            *handshake_complete = true;
            incoming.handshake_completed = true;
            tracing::info!(
                socket = %socket,
                client = conn.is_client(),
                alpn = ?conn.alpn_protocol().map(String::from_utf8_lossy),
                "tls handshake complete"
            );
        }
        Ok(incoming)
    }

    /// Encrypt and send. `Ok(0)` while the socket is connecting or the
    /// handshake has not finished; the caller retries later.
    pub fn encrypt(&self, socket: SocketId, plaintext: &[u8]) -> Result<usize, TlsError> {
        if self.transport.state(socket) == SocketState::Connecting {
            return Ok(0);
        }

        let session = self.client_session(socket)?;
        let mut guard = session.lock();
        let conn = &mut guard.conn;

        if conn.is_handshaking() {
            self.flush(socket, conn)?;
            return Ok(0);
        }

        // The session buffers a bounded amount of outgoing records; drain
        // them to the transport whenever it stops taking plaintext.
        let mut rest = plaintext;
        while !rest.is_empty() {
            let n = conn.writer().write(rest)?;
            if n == 0 {
                if !conn.wants_write() {
                    return Err(io::Error::from(io::ErrorKind::WriteZero).into());
                }
                self.flush(socket, conn)?;
                continue;
            }
            rest = &rest[n..];
        }
        self.flush(socket, conn)?;
        Ok(plaintext.len())
    }

    /// Handshake finished on `socket`.
    pub fn is_active(&self, socket: SocketId) -> bool {
        self.sessions
            .get(socket)
            .is_some_and(|session| !session.lock().conn.is_handshaking())
    }

    pub fn negotiated_alpn(&self, socket: SocketId) -> Option<Vec<u8>> {
        let session = self.sessions.get(socket)?;
        let guard = session.lock();
        guard.conn.alpn_protocol().map(<[u8]>::to_vec)
    }

    pub fn has_session(&self, socket: SocketId) -> bool {
        self.sessions.contains(socket)
    }

    /// Send close_notify and drop the session.
    pub fn close(&self, socket: SocketId) {
        if let Some(session) = self.sessions.remove(socket) {
            let mut guard = session.lock();
            guard.conn.send_close_notify();
            if let Err(e) = self.flush(socket, &mut guard.conn) {
                tracing::debug!(socket = %socket, error = %e, "close_notify not sent");
            }
        }
    }

    /// Drop the session without telling the peer.
    pub fn forget(&self, socket: SocketId) {
        self.sessions.remove(socket);
    }
}

impl Link for TlsAdapter {
    fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    fn send(&self, socket: SocketId, data: &[u8]) -> io::Result<usize> {
        self.encrypt(socket, data).map_err(|e| match e {
            TlsError::Io(e) => e,
            other => io::Error::other(other),
        })
    }
}
