//! realtide-http — `reqwest` implementation of the Realtide [`Transport`].
//!
//! One client serves both kinds of traffic: one-shot JSON requests get a
//! per-request timeout, the realtime event stream gets none.
//!
//! [`Transport`]: realtide_core::Transport

pub mod client;

pub use client::HttpTransport;
