//! Binary configuration.
//!
//! Read from the YAML file named by `WIRELINK_CONFIG` when set; every field
//! has a default so an empty file, or no file, is a valid configuration.
//! `LISTEN` overrides `server.listen_addr`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::http::driver::HttpConfig;
use crate::http::message::MessageLimits;
use crate::websocket::driver::WebSocketConfig;
use crate::websocket::frame::DEFAULT_MAX_MESSAGE_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Http,
    Websocket,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub listen_addr: String,
    pub mode: Mode,
    pub agent: Option<String>,
    /// Interval of the outbound pump.
    pub tick_ms: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            mode: Mode::Http,
            agent: Some(concat!("wirelink/", env!("CARGO_PKG_VERSION")).to_string()),
            tick_ms: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    pub max_headers: usize,
    pub header_bytes: usize,
    pub body_capacity: usize,
    pub queue_capacity: usize,
    pub max_message_size: usize,
}

impl Default for LimitsSection {
    fn default() -> Self {
        let limits = MessageLimits::default();
        Self {
            max_headers: limits.max_headers,
            header_bytes: limits.header_bytes,
            body_capacity: limits.body_capacity,
            queue_capacity: 1024,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsSection {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WebSocketSection {
    /// Sub-protocol clients must offer.
    pub protocol: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,
    pub limits: LimitsSection,
    pub tls: Option<TlsSection>,
    pub websocket: WebSocketSection,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var("WIRELINK_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        if let Ok(addr) = std::env::var("LISTEN") {
            cfg.server.listen_addr = addr;
        }
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.server.tick_ms.max(1))
    }

    pub fn message_limits(&self) -> MessageLimits {
        MessageLimits {
            max_headers: self.limits.max_headers,
            header_bytes: self.limits.header_bytes,
            body_capacity: self.limits.body_capacity,
        }
    }

    pub fn http(&self) -> HttpConfig {
        HttpConfig {
            limits: self.message_limits(),
            queue_capacity: self.limits.queue_capacity,
            agent: self.server.agent.clone(),
            default_port: if self.tls.is_some() { 443 } else { 80 },
        }
    }

    pub fn websocket(&self) -> WebSocketConfig {
        WebSocketConfig {
            limits: self.message_limits(),
            queue_capacity: self.limits.queue_capacity,
            agent: self.server.agent.clone(),
            protocol: self.websocket.protocol.clone(),
            origin: None,
            max_message_size: self.limits.max_message_size,
        }
    }
}
