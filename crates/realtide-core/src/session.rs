//! Session state negotiated through the handshake event.

use crate::frame::EventRecord;

/// Reserved event name of the server greeting.
pub const HANDSHAKE_EVENT: &str = "PB_CONNECT";

/// Server-issued identity of the current connection attempt.
///
/// Empty and not ready until the handshake arrives; both fields change
/// together and are cleared on disconnect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    client_id: String,
    ready: bool,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Record the handshake. The only transition into the ready state.
    pub fn establish(&mut self, client_id: impl Into<String>) {
        self.client_id = client_id.into();
        self.ready = true;
    }

    pub fn reset(&mut self) {
        self.client_id.clear();
        self.ready = false;
    }

    /// Returns `true` if a registration call can be issued for this session.
    pub fn can_register(&self) -> bool {
        self.ready && !self.client_id.is_empty()
    }
}

/// Returns the session id carried by a handshake record, or `None` for
/// every other record. A handshake without `clientId` yields an empty id.
pub fn handshake_client_id(record: &EventRecord) -> Option<String> {
    if record.event != HANDSHAKE_EVENT {
        return None;
    }
    let client_id = record
        .data
        .as_ref()
        .and_then(|d| d.get("clientId"))
        .and_then(|c| c.as_str())
        .unwrap_or_default();
    Some(client_id.to_string())
}

/// Lifecycle of the background connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No background connection; nothing subscribed or explicitly disconnected.
    #[default]
    Idle,
    /// Opening the streaming request.
    Connecting,
    /// Response headers received; frames are being decoded.
    Streaming,
    /// Stream failed or closed; waiting out the reconnect delay.
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Streaming => write!(f, "streaming"),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}
