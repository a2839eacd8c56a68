//! HTTP/1.1 message engine.
//!
//! # Architecture
//!
//! - **`message`**: [`HttpMessage`], one request or response, built for sending
//!   or filled incrementally from the wire
//! - **`flags`**, **`status`**: typed attributes packed into one word, status codes
//! - **`headers`**: fixed-capacity header table backed by one byte buffer
//! - **`parser`** / **`writer`**: incremental deserialization and serialization,
//!   chunked transfer encoding included
//! - **`aws4`**: AWS Signature Version 4 request signing
//! - **`driver`**: [`HttpDriver`], per-connection read/write orchestration
//!
//! # Message lifecycle on a client
//!
//! ```text
//!   push_out_message ──▶ connect ──▶ send ──▶ awaiting response
//!                           │                      │
//!                     failed: 600            response: callback
//!                                            closed / expired: 408
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use wirelink::http::{HttpConfig, HttpDriver, HttpMessage, Method};
//! use wirelink::transport::MemoryTransport;
//!
//! let transport = Arc::new(MemoryTransport::new());
//! let client = HttpDriver::plain(transport.clone(), HttpConfig::default());
//!
//! let mut request = HttpMessage::from_url(Method::GET, "http://example.com/index.html")?;
//! request.set_callback(|response| println!("{}", response.status().as_u16()));
//! client.push_out_message(request).ok();
//! ```

pub mod aws4;
pub mod driver;
pub mod flags;
pub mod headers;
pub mod message;
pub mod parser;
pub mod status;
pub mod writer;

pub use driver::{HttpConfig, HttpDriver};
pub use flags::{CacheControl, Connection, ContentEncoding, Method, TransferEncoding, Upgrade};
pub use message::{HttpMessage, KeepAlive, MessageLimits};
pub use parser::ParseError;
pub use status::StatusCode;
