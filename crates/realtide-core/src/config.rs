//! Engine and transport configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration shared by the HTTP transport and the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Server base URL, e.g. "http://127.0.0.1:8090"
    pub base_url: String,
    /// `Accept-Language` sent with every request
    #[serde(default = "default_lang")]
    pub lang: String,
    /// `User-Agent` identifying this client
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Timeout for one-shot requests (never applied to the event stream)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// How long `subscribe` waits for the handshake
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Fixed pause between a dropped stream and the next attempt
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

fn default_lang() -> String { "en-US".into() }
fn default_user_agent() -> String { concat!("realtide-rust-sdk/", env!("CARGO_PKG_VERSION")).into() }
fn default_request_timeout_ms() -> u64 { 30_000 }
fn default_connect_timeout_ms() -> u64 { 10_000 }
fn default_reconnect_delay_ms() -> u64 { 500 }

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl RealtimeConfig {
    /// Defaults for everything but the base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            lang: default_lang(),
            user_agent: default_user_agent(),
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }

    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = millis(timeout);
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = millis(delay);
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}
