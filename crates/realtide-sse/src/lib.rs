//! realtide-sse — realtime subscription engine over Server-Sent Events.
//!
//! # Features
//! - One background stream per client, opened on the first subscription and
//!   closed with the last one
//! - Session handshake (`PB_CONNECT`) and full-set resubscription after every
//!   (re)connect
//! - Unbounded reconnect with a fixed delay
//! - Per-listener panic isolation
//! - Collection-scoped record subscriptions (`collection/topic`)

pub mod client;
mod connection;
mod dispatch;
mod engine;
pub mod records;

pub use client::{RealtimeClient, Subscription};
pub use records::{RecordEvent, RecordSubscriptions};
