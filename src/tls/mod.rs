//! TLS over the transport seam, and its composition with the HTTP and
//! WebSocket drivers.

pub mod adapter;
pub mod config;
pub mod secure;

pub use adapter::{TlsAdapter, TlsError};
pub use secure::{HttpsDriver, SecureTransport, WssDriver};
