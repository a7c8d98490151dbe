//! Signaling data model.
//!
//! Payloads are session descriptions and ICE candidates produced
//! client-side. The relay carries them as raw JSON and never looks inside.

use serde::{Deserialize, Serialize};

/// The three handshake message kinds the relay brokers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    /// Session description from the calling side. Posting one also
    /// registers a pending call for the receiver.
    Offer,
    /// Session description from the answering side.
    Answer,
    /// One connectivity candidate; many flow per handshake.
    Candidate,
}

/// One undelivered handshake message in a recipient's mailbox.
///
/// A mailbox holds at most one signal per sender — a newer signal from the
/// same sender replaces an unfetched one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub sender_id: String,
    pub sender_name: String,
    #[serde(rename = "type")]
    pub kind: SignalKind,
    /// Opaque to the relay — routed, never inspected.
    pub payload: serde_json::Value,
    /// Server receive time, Unix milliseconds. Used only for age checks.
    pub received_at: i64,
}

/// An unanswered incoming call invitation, derived from an offer signal.
///
/// Exists exactly while the offer is posted but unfetched and younger than
/// the call validity window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCall {
    pub caller_id: String,
    pub caller_name: String,
    pub payload: serde_json::Value,
    /// When the offer was posted, Unix milliseconds.
    pub timestamp: i64,
}
