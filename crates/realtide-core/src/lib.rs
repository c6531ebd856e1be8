//! realtide-core — foundation types for the Realtide subscription engine.
//!
//! # Overview
//!
//! Realtide keeps a long-lived Server-Sent Events stream open against a
//! realtime endpoint and fans decoded events out to topic listeners. The core
//! crate holds everything that does not touch a runtime or a socket:
//!
//! - [`FrameDecoder`]: incremental `text/event-stream` frame decoder
//! - [`SubscriptionRegistry`]: topic → listener map and active topic set
//! - [`SessionState`]: server-issued client id and readiness
//! - [`Transport`]: the async boundary to the HTTP layer
//! - [`AuthStore`]: credential holder with JWT expiry checks
//! - [`ClientError`]: structured error type

pub mod auth;
pub mod config;
pub mod error;
pub mod frame;
pub mod registry;
pub mod session;
pub mod transport;

pub use auth::AuthStore;
pub use config::RealtimeConfig;
pub use error::{ClientError, Result};
pub use frame::{decode_stream, EventRecord, FrameDecoder};
pub use registry::{Listener, ListenerId, SubscribeOptions, SubscriptionRegistry};
pub use session::{ConnectionState, SessionState, HANDSHAKE_EVENT};
pub use transport::{join_url, ByteStream, HttpMethod, SendOptions, Transport, REALTIME_PATH};
