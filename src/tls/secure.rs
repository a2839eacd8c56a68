//! TLS composed with a protocol driver.
//!
//! `SecureTransport<D>` owns the [`TlsAdapter`] and an inner driver built on
//! top of it (the inner driver's link is the adapter, so its sends are
//! encrypted). Reads go through here: ciphertext is decrypted and the
//! plaintext fed to the inner driver's `process_read`, bypassing its own
//! `read` since the transport bytes are already consumed.

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use rustls::{ClientConfig, ServerConfig};

use crate::driver::{DriverError, MessageDriver};
use crate::http::driver::{HttpConfig, HttpDriver};
use crate::tls::adapter::TlsAdapter;
use crate::transport::{READ_CHUNK, SocketId, Transport};
use crate::websocket::connection::WebSocketHandler;
use crate::websocket::driver::{WebSocketConfig, WebSocketDriver};

pub type HttpsDriver = SecureTransport<HttpDriver>;
pub type WssDriver = SecureTransport<WebSocketDriver>;

pub struct SecureTransport<D> {
    adapter: Arc<TlsAdapter>,
    inner: D,
}

impl<D: MessageDriver> SecureTransport<D> {
    /// `inner` must send through `adapter`.
    pub fn new(adapter: Arc<TlsAdapter>, inner: D) -> Self {
        Self { adapter, inner }
    }

    pub fn adapter(&self) -> &Arc<TlsAdapter> {
        &self.adapter
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    fn transport(&self) -> &dyn Transport {
        self.adapter.transport_handle().as_ref()
    }

    pub fn read(&self, socket: SocketId) -> Result<(), DriverError> {
        let mut buf = vec![0u8; READ_CHUNK];
        match self.transport().receive(socket, &mut buf) {
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(()),
            Ok(0) | Err(_) => {
                tracing::debug!(socket = %socket, "end of tls stream");
                self.adapter.forget(socket);
                let result = self.inner.process_read(socket, &[]);
                self.transport().mark_closable(socket);
                result
            }
            Ok(n) => self.process_tls(socket, &buf[..n]),
        }
    }

    /// Decrypt `ciphertext` and hand the plaintext to the inner driver.
    pub fn process_tls(&self, socket: SocketId, ciphertext: &[u8]) -> Result<(), DriverError> {
        let incoming = match self.adapter.process_incoming(socket, ciphertext) {
            Ok(incoming) => incoming,
            Err(e) => {
                tracing::warn!(socket = %socket, error = %e, "tls failure, closing");
                self.adapter.forget(socket);
                self.inner.socket_closed(socket);
                self.transport().mark_closable(socket);
                return Err(e.into());
            }
        };

        if !incoming.plaintext.is_empty() {
            self.inner.process_read(socket, &incoming.plaintext)?;
        }
        if incoming.closed {
            tracing::debug!(socket = %socket, "peer sent close_notify");
            self.adapter.forget(socket);
            self.inner.process_read(socket, &[])?;
            self.transport().mark_closable(socket);
        }
        Ok(())
    }

    /// `data` is ciphertext straight from the transport; empty means end
    /// of stream.
    pub fn process_read(&self, socket: SocketId, data: &[u8]) -> Result<(), DriverError> {
        if data.is_empty() {
            self.adapter.forget(socket);
            return self.inner.process_read(socket, data);
        }
        self.process_tls(socket, data)
    }

    pub fn process_outbound(&self, budget: Duration) -> Result<(), DriverError> {
        self.inner.process_outbound(budget)
    }

    pub fn socket_closed(&self, socket: SocketId) {
        self.adapter.forget(socket);
        self.inner.socket_closed(socket);
    }
}

impl<D> Deref for SecureTransport<D> {
    type Target = D;

    fn deref(&self) -> &D {
        &self.inner
    }
}

impl<D: MessageDriver> MessageDriver for SecureTransport<D> {
    fn read(&self, socket: SocketId) -> Result<(), DriverError> {
        SecureTransport::read(self, socket)
    }

    fn process_read(&self, socket: SocketId, data: &[u8]) -> Result<(), DriverError> {
        SecureTransport::process_read(self, socket, data)
    }

    fn process_outbound(&self, budget: Duration) -> Result<(), DriverError> {
        self.inner.process_outbound(budget)
    }

    fn socket_closed(&self, socket: SocketId) {
        SecureTransport::socket_closed(self, socket)
    }
}

impl HttpsDriver {
    /// HTTPS over `transport`. Give a server config to accept, a client
    /// config to connect, or both.
    pub fn https(
        transport: Arc<dyn Transport>,
        server: Option<Arc<ServerConfig>>,
        client: Option<Arc<ClientConfig>>,
        config: HttpConfig,
    ) -> Self {
        let adapter = Arc::new(TlsAdapter::new(transport, server, client));
        let inner = HttpDriver::new(adapter.clone(), config);
        Self::new(adapter, inner)
    }
}

impl WssDriver {
    pub fn wss(
        transport: Arc<dyn Transport>,
        server: Option<Arc<ServerConfig>>,
        client: Option<Arc<ClientConfig>>,
        config: WebSocketConfig,
        handler: Arc<dyn WebSocketHandler>,
    ) -> Self {
        let adapter = Arc::new(TlsAdapter::new(transport, server, client));
        let inner = WebSocketDriver::new(adapter.clone(), config, handler);
        Self::new(adapter, inner)
    }
}
