//! Call-signaling relay: mailboxes, pending calls, and presence.
//!
//! The store owns all relay state; the api module exposes it over HTTP
//! as a short-polling boundary.

pub mod api;
pub mod store;
pub mod types;

pub use store::{RelayConfig, SignalingStore};
pub use types::{PendingCall, Signal, SignalKind};
