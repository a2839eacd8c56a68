use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tracing::info;

use crate::config::{Config, Mode};
use crate::driver::MessageDriver;
use crate::http::driver::HttpDriver;
use crate::http::message::HttpMessage;
use crate::http::status::StatusCode;
use crate::tls::config::server_config_from_pem;
use crate::tls::secure::{HttpsDriver, WssDriver};
use crate::transport::{SocketId, TcpTransport, Transport};
use crate::websocket::connection::WebSocketHandler;
use crate::websocket::driver::WebSocketDriver;
use crate::websocket::frame::{Opcode, WebFrame};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Echoes every message back to its sender.
pub struct Echo;

impl WebSocketHandler for Echo {
    fn on_connected(&self, _driver: &WebSocketDriver, socket: SocketId) {
        info!(socket = %socket, "websocket client connected");
    }

    fn on_received(&self, driver: &WebSocketDriver, socket: SocketId, frame: &WebFrame) {
        let queued = match frame.opcode() {
            Opcode::Text => driver.send_text(socket, frame.as_text().unwrap_or_default()),
            _ => driver.send_binary(socket, frame.payload()),
        };
        if queued.is_err() {
            tracing::warn!(socket = %socket, "echo dropped, outbound queue full");
        }
    }

    fn on_closed(&self, socket: SocketId) {
        info!(socket = %socket, "websocket client gone");
    }
}

/// The driver serving accepted sockets.
pub enum Service {
    Http(HttpDriver),
    Https(HttpsDriver),
    WebSocket(WebSocketDriver),
    Wss(WssDriver),
}

impl Service {
    pub fn build(cfg: &Config, transport: Arc<dyn Transport>) -> anyhow::Result<Self> {
        let tls = match &cfg.tls {
            Some(tls) => Some(
                server_config_from_pem(&tls.cert_path, &tls.key_path)
                    .context("loading tls certificate")?,
            ),
            None => None,
        };

        let service = match (cfg.server.mode, tls) {
            (Mode::Http, None) => Service::Http(HttpDriver::plain(transport, cfg.http())),
            (Mode::Http, Some(server)) => {
                Service::Https(HttpsDriver::https(transport, Some(server), None, cfg.http()))
            }
            (Mode::Websocket, None) => Service::WebSocket(WebSocketDriver::plain(
                transport,
                cfg.websocket(),
                Arc::new(Echo),
            )),
            (Mode::Websocket, Some(server)) => Service::Wss(WssDriver::wss(
                transport,
                Some(server),
                None,
                cfg.websocket(),
                Arc::new(Echo),
            )),
        };
        Ok(service)
    }

    pub fn driver(&self) -> &dyn MessageDriver {
        match self {
            Service::Http(d) => d,
            Service::Https(d) => d,
            Service::WebSocket(d) => d,
            Service::Wss(d) => d,
        }
    }

    fn http(&self) -> Option<&HttpDriver> {
        match self {
            Service::Http(d) => Some(d),
            Service::Https(d) => Some(d.inner()),
            _ => None,
        }
    }

    /// Answer every completed request with `hello`.
    pub fn respond(&self) {
        let Some(http) = self.http() else {
            return;
        };
        while let Some(request) = http.next_request() {
            let mut response = HttpMessage::response(&request, "hello", StatusCode::Ok);
            response.push_header("Content-Type", "text/plain");
            if http.push_out_message(response).is_err() {
                tracing::warn!(path = %request.path(), "response dropped, outbound queue full");
            }
        }
    }
}

/// One pass of the polling loop.
pub fn tick(transport: &TcpTransport, service: &Service, budget: Duration) {
    let driver = service.driver();
    for socket in transport.sockets() {
        if let Err(e) = driver.read(socket) {
            tracing::debug!(socket = %socket, error = %e, "read failed");
        }
    }

    service.respond();

    if let Err(e) = driver.process_outbound(budget) {
        tracing::error!(error = %e, "outbound pump failed");
    }

    for socket in transport.reap() {
        driver.socket_closed(socket);
    }
}

pub async fn run(cfg: &Config) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&cfg.server.listen_addr)
        .await
        .with_context(|| format!("binding {}", cfg.server.listen_addr))?;
    info!(
        "Listening on {} ({:?}{})",
        cfg.server.listen_addr,
        cfg.server.mode,
        if cfg.tls.is_some() { ", tls" } else { "" }
    );

    let transport = Arc::new(TcpTransport::new(Handle::current(), CONNECT_TIMEOUT));
    let service = Arc::new(Service::build(cfg, transport.clone())?);

    let interval = cfg.tick();
    let poll_transport = transport.clone();
    let poll_service = service.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            tick(&poll_transport, &poll_service, interval);
        }
    });

    loop {
        let (stream, peer) = listener.accept().await?;
        match transport.register(stream) {
            Ok(socket) => info!(socket = %socket, "Accepted connection from {}", peer),
            Err(e) => tracing::error!("Failed to adopt connection from {}: {}", peer, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    #[test]
    fn http_service_answers_hello() {
        let transport = Arc::new(MemoryTransport::new());
        let (server_socket, peer) = transport.pair();
        let service = Service::build(&Config::default(), transport.clone()).unwrap();
        assert!(matches!(service, Service::Http(_)));

        service
            .driver()
            .process_read(server_socket, b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .unwrap();
        service.respond();
        service.driver().process_outbound(Duration::from_millis(10)).unwrap();

        let mut buf = [0u8; 1024];
        let n = transport.receive(peer, &mut buf).unwrap();
        let text = String::from_utf8_lossy(&buf[..n]);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Type: text/plain\r\n"));
        assert!(text.ends_with("\r\n\r\nhello"));
    }

    #[test]
    fn websocket_mode_builds_websocket_service() {
        let cfg = Config::from_yaml("server:\n  mode: websocket\n").unwrap();
        let service = Service::build(&cfg, Arc::new(MemoryTransport::new())).unwrap();
        assert!(matches!(service, Service::WebSocket(_)));
        // Nothing to answer outside http mode.
        service.respond();
    }
}
