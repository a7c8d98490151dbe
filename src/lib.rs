//! Call Relay
//!
//! An HTTP polling mailbox for WebRTC call signaling. Two clients that have
//! no direct channel to each other exchange the handshake messages needed to
//! establish a media session through per-recipient mailboxes on this server:
//!
//! 1. **Offers**: the caller posts an offer; the relay stores it in the
//!    receiver's mailbox and registers a pending call the receiver discovers
//!    by short-polling.
//!
//! 2. **Answers**: the receiver posts an answer back into the caller's
//!    mailbox; the caller polls until it arrives.
//!
//! 3. **Candidates**: both sides post connectivity candidates for the
//!    lifetime of the handshake, delivered the same way.
//!
//! Each ordered (sender, receiver) pair holds at most one undelivered signal
//! — a newer signal from the same sender replaces the old one — and a fetch
//! consumes the slot, so delivery is exactly-once per posted signal.
//!
//! **Privacy**: signal payloads are opaque to the relay. It routes them
//! without inspecting their structure.

pub mod clock;
pub mod signaling;
