//! wirelink - HTTP/1.1, WebSocket and TLS protocol drivers over pluggable
//! transports.
//!
//! The drivers are synchronous and never block: an external loop calls
//! `read` when a socket has bytes and `process_outbound` on every tick.

pub mod config;
pub mod driver;
pub mod http;
pub mod server;
pub mod tls;
pub mod transport;
pub mod websocket;
