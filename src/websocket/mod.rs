//! WebSocket (RFC 6455) framing engine.
//!
//! - **`frame`**: [`WebFrame`] codec and message reassembly
//! - **`handshake`**: upgrade request/response and the accept key
//! - **`connection`**: per-socket state and the [`WebSocketHandler`] callbacks
//! - **`driver`**: [`WebSocketDriver`], handshake and frame orchestration

pub mod connection;
pub mod driver;
pub mod frame;
pub mod handshake;

pub use connection::{ConnectState, WebConnection, WebSocketHandler};
pub use driver::{Packet, WebSocketConfig, WebSocketDriver};
pub use frame::{FrameError, Opcode, WebFrame};
pub use handshake::HandshakeError;
