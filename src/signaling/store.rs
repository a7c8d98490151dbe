//! Relay state management.
//!
//! Tracks per-recipient mailboxes, pending call invitations, and user
//! presence. All data structures are concurrent (DashMap) for lock-free
//! access. Expiry is lazy — staleness is discovered at read time by
//! comparing timestamps against the injected clock; there is no background
//! sweeper task.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;

use crate::clock::{Clock, SystemClock};
use crate::signaling::types::{PendingCall, Signal, SignalKind};

/// Default validity window for an unanswered call invitation (seconds).
const DEFAULT_CALL_TTL_SECS: i64 = 60;

/// Default window within which a user counts as active (seconds).
const DEFAULT_PRESENCE_TTL_SECS: i64 = 60;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub port: u16,
    pub call_ttl_secs: i64,
    pub presence_ttl_secs: i64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            call_ttl_secs: DEFAULT_CALL_TTL_SECS,
            presence_ttl_secs: DEFAULT_PRESENCE_TTL_SECS,
        }
    }
}

/// A user seen by the relay within the presence window.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveUser {
    pub user_id: String,
    /// Last activity, Unix milliseconds.
    pub last_active_at: i64,
    pub age_secs: i64,
}

/// Per-user state counts for the debug endpoint. No payload contents.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCounts {
    pub pending_calls: usize,
    pub mailbox_entries: usize,
}

/// Aggregate view of relay state for introspection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugSnapshot {
    /// Keyed by recipient user id.
    pub users: BTreeMap<String, UserCounts>,
    pub total_pending_calls: usize,
    pub total_mailbox_entries: usize,
}

/// Shared relay state.
///
/// All maps are process-wide and in-memory; nothing survives a restart —
/// clients are expected to detect a dead handshake and retry.
#[derive(Clone)]
pub struct SignalingStore {
    /// receiverId → (senderId → latest undelivered signal from that sender).
    mailboxes: Arc<DashMap<String, DashMap<String, Signal>>>,

    /// receiverId → (callerId → pending call invitation).
    /// Exactly the unfetched offers, subject to the call validity window.
    pending_calls: Arc<DashMap<String, DashMap<String, PendingCall>>>,

    /// userId → last activity, Unix milliseconds.
    presence: Arc<DashMap<String, i64>>,

    /// Server configuration.
    pub config: RelayConfig,

    clock: Arc<dyn Clock>,
}

impl SignalingStore {
    /// Create a new store with the given configuration, on wall-clock time.
    pub fn new(config: RelayConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a new store with an injected clock (used by tests to drive
    /// expiry deterministically).
    pub fn with_clock(config: RelayConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            mailboxes: Arc::new(DashMap::new()),
            pending_calls: Arc::new(DashMap::new()),
            presence: Arc::new(DashMap::new()),
            config,
            clock,
        }
    }

    fn call_ttl_millis(&self) -> i64 {
        self.config.call_ttl_secs * 1000
    }

    fn presence_ttl_millis(&self) -> i64 {
        self.config.presence_ttl_secs * 1000
    }

    // ── Presence ──────────────────────────────────────────────────────────

    /// Record activity for a user. Every operation that names a user as an
    /// actor (sender or polling receiver) refreshes their record.
    fn touch(&self, user_id: &str) {
        self.presence
            .insert(user_id.to_string(), self.clock.now_millis());
    }

    /// Users active within the presence window, sorted by id.
    /// Stale records are dropped as a side effect of enumeration.
    pub fn active_users(&self) -> Vec<ActiveUser> {
        let now = self.clock.now_millis();
        let window = self.presence_ttl_millis();

        self.presence.retain(|_, last| now - *last <= window);

        let mut users: Vec<ActiveUser> = self
            .presence
            .iter()
            .map(|entry| ActiveUser {
                user_id: entry.key().clone(),
                last_active_at: *entry.value(),
                age_secs: (now - *entry.value()) / 1000,
            })
            .collect();
        users.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        users
    }

    // ── Mailboxes ─────────────────────────────────────────────────────────

    /// Store a signal in the receiver's mailbox.
    ///
    /// Last writer wins: a newer signal from the same sender replaces any
    /// undelivered one for that (sender, receiver) pair. Offers additionally
    /// register a pending call the receiver can discover by polling.
    pub fn post_signal(
        &self,
        sender_id: &str,
        sender_name: &str,
        receiver_id: &str,
        kind: SignalKind,
        payload: Value,
    ) {
        self.touch(sender_id);
        let now = self.clock.now_millis();

        let call = (kind == SignalKind::Offer).then(|| PendingCall {
            caller_id: sender_id.to_string(),
            caller_name: sender_name.to_string(),
            payload: payload.clone(),
            timestamp: now,
        });

        let signal = Signal {
            sender_id: sender_id.to_string(),
            sender_name: sender_name.to_string(),
            kind,
            payload,
            received_at: now,
        };

        self.mailboxes
            .entry(receiver_id.to_string())
            .or_default()
            .insert(sender_id.to_string(), signal);

        if let Some(call) = call {
            self.pending_calls
                .entry(receiver_id.to_string())
                .or_default()
                .insert(sender_id.to_string(), call);
            tracing::info!(
                caller = sender_id,
                receiver = receiver_id,
                "Registered pending call"
            );
        }

        tracing::debug!(
            sender = sender_id,
            receiver = receiver_id,
            kind = ?kind,
            "Stored signal"
        );
    }

    /// Take the signal from `from_user_id` out of `user_id`'s mailbox.
    ///
    /// Removal is a single atomic map operation — never a lookup followed by
    /// a separate delete — so a fetch cannot race a concurrent overwrite
    /// from the same sender, and two concurrent fetchers for the same pair
    /// cannot both receive a result. A fetched signal is never observable
    /// again.
    pub fn fetch_signal(&self, user_id: &str, from_user_id: &str) -> Option<Signal> {
        self.touch(user_id);

        let signal = self
            .mailboxes
            .get(user_id)
            .and_then(|inbox| inbox.remove(from_user_id))
            .map(|(_, signal)| signal)?;

        // Fetching an offer also consumes the paired pending call; every
        // path that removes an offer mailbox entry must keep the two
        // structures consistent.
        if signal.kind == SignalKind::Offer {
            if let Some(calls) = self.pending_calls.get(user_id) {
                calls.remove(from_user_id);
            }
        }

        tracing::debug!(
            user = user_id,
            from = from_user_id,
            kind = ?signal.kind,
            "Delivered signal"
        );
        Some(signal)
    }

    // ── Pending Calls ─────────────────────────────────────────────────────

    /// Look up an incoming call for `user_id` without consuming it.
    ///
    /// Invitations older than the call validity window are purged here and
    /// treated as absent. The underlying mailbox entry is not touched — a
    /// late fetch can still deliver the offer directly. When several callers
    /// are ringing, exactly one is surfaced; the rest stay registered until
    /// consumed, rejected, or expired.
    pub fn check_pending_call(&self, user_id: &str) -> Option<PendingCall> {
        self.touch(user_id);

        let calls = self.pending_calls.get(user_id)?;

        let now = self.clock.now_millis();
        let ttl = self.call_ttl_millis();
        calls.retain(|caller, call| {
            let valid = now - call.timestamp <= ttl;
            if !valid {
                tracing::debug!(
                    receiver = user_id,
                    caller = caller.as_str(),
                    "Purged expired pending call"
                );
            }
            valid
        });

        let call = calls.iter().next().map(|entry| entry.value().clone());
        call
    }

    /// Clear call state as seen from the rejecting party: the pending call
    /// from `from_user_id` and the mailbox entry it rode in on. Rejecting a
    /// call that does not exist is a no-op.
    pub fn reject(&self, user_id: &str, from_user_id: &str) {
        self.touch(user_id);

        if let Some(calls) = self.pending_calls.get(user_id) {
            calls.remove(from_user_id);
        }
        if let Some(inbox) = self.mailboxes.get(user_id) {
            inbox.remove(from_user_id);
        }

        tracing::info!(user = user_id, caller = from_user_id, "Rejected call");
    }

    // ── Introspection ─────────────────────────────────────────────────────

    /// Total undelivered signals across all mailboxes.
    pub fn mailbox_entry_count(&self) -> usize {
        self.mailboxes.iter().map(|entry| entry.value().len()).sum()
    }

    /// Total registered pending calls (including any not yet lazily purged).
    pub fn pending_call_count(&self) -> usize {
        self.pending_calls
            .iter()
            .map(|entry| entry.value().len())
            .sum()
    }

    /// Per-user counts of pending calls and mailbox entries.
    pub fn debug_snapshot(&self) -> DebugSnapshot {
        let mut users: BTreeMap<String, UserCounts> = BTreeMap::new();

        for entry in self.mailboxes.iter() {
            if entry.value().is_empty() {
                continue;
            }
            users.entry(entry.key().clone()).or_default().mailbox_entries =
                entry.value().len();
        }
        for entry in self.pending_calls.iter() {
            if entry.value().is_empty() {
                continue;
            }
            users.entry(entry.key().clone()).or_default().pending_calls =
                entry.value().len();
        }

        DebugSnapshot {
            total_pending_calls: users.values().map(|c| c.pending_calls).sum(),
            total_mailbox_entries: users.values().map(|c| c.mailbox_entries).sum(),
            users,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    fn test_store() -> (SignalingStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store = SignalingStore::with_clock(RelayConfig::default(), clock.clone());
        (store, clock)
    }

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.call_ttl_secs, 60);
        assert_eq!(config.presence_ttl_secs, 60);
    }

    #[test]
    fn test_fetch_delivers_exactly_once() {
        let (store, _) = test_store();

        store.post_signal("u1", "Alice", "u2", SignalKind::Candidate, json!({"c": 1}));

        let signal = store.fetch_signal("u2", "u1").unwrap();
        assert_eq!(signal.sender_id, "u1");
        assert_eq!(signal.sender_name, "Alice");
        assert_eq!(signal.kind, SignalKind::Candidate);
        assert_eq!(signal.payload, json!({"c": 1}));

        // Consumed — a second fetch with no intervening post is absent
        assert!(store.fetch_signal("u2", "u1").is_none());
    }

    #[test]
    fn test_fetch_with_empty_mailbox_is_absent() {
        let (store, _) = test_store();
        assert!(store.fetch_signal("u2", "u1").is_none());
    }

    #[test]
    fn test_newer_signal_overwrites_unfetched_one() {
        let (store, _) = test_store();

        store.post_signal("u1", "Alice", "u2", SignalKind::Candidate, json!({"c": 1}));
        store.post_signal("u1", "Alice", "u2", SignalKind::Candidate, json!({"c": 2}));

        let signal = store.fetch_signal("u2", "u1").unwrap();
        assert_eq!(signal.payload, json!({"c": 2}));
        assert!(store.fetch_signal("u2", "u1").is_none());
    }

    #[test]
    fn test_offer_registers_pending_call() {
        let (store, _) = test_store();

        store.post_signal("u1", "Alice", "u2", SignalKind::Offer, json!({"sdp": "v=0"}));

        let call = store.check_pending_call("u2").unwrap();
        assert_eq!(call.caller_id, "u1");
        assert_eq!(call.caller_name, "Alice");
        assert_eq!(call.payload, json!({"sdp": "v=0"}));
    }

    #[test]
    fn test_check_pending_call_does_not_consume() {
        let (store, _) = test_store();

        store.post_signal("u1", "Alice", "u2", SignalKind::Offer, json!({}));

        // The receiver may poll repeatedly while deciding whether to answer
        assert!(store.check_pending_call("u2").is_some());
        assert!(store.check_pending_call("u2").is_some());
    }

    #[test]
    fn test_fetching_offer_clears_pending_call() {
        let (store, _) = test_store();

        store.post_signal("u1", "Alice", "u2", SignalKind::Offer, json!({}));
        assert!(store.check_pending_call("u2").is_some());

        store.fetch_signal("u2", "u1").unwrap();
        assert!(store.check_pending_call("u2").is_none());
    }

    #[test]
    fn test_non_offer_signals_never_ring() {
        let (store, _) = test_store();

        store.post_signal("u1", "Alice", "u2", SignalKind::Answer, json!({}));
        store.post_signal("u1", "Alice", "u2", SignalKind::Candidate, json!({}));

        assert!(store.check_pending_call("u2").is_none());
    }

    #[test]
    fn test_pending_call_expires_after_ttl() {
        let (store, clock) = test_store();

        store.post_signal("u1", "Alice", "u2", SignalKind::Offer, json!({}));

        clock.advance_secs(59);
        assert!(store.check_pending_call("u2").is_some());

        clock.advance_secs(2);
        assert!(store.check_pending_call("u2").is_none());
    }

    #[test]
    fn test_expired_offer_remains_fetchable() {
        let (store, clock) = test_store();

        store.post_signal("u1", "Alice", "u2", SignalKind::Offer, json!({"sdp": "v=0"}));
        clock.advance_secs(120);

        // Expiry only affects pending-call visibility; the mailbox entry
        // has no TTL and a late fetch still delivers it.
        assert!(store.check_pending_call("u2").is_none());
        let signal = store.fetch_signal("u2", "u1").unwrap();
        assert_eq!(signal.kind, SignalKind::Offer);
    }

    #[test]
    fn test_reject_clears_pending_call_and_mailbox() {
        let (store, _) = test_store();

        store.post_signal("u1", "Alice", "u2", SignalKind::Offer, json!({}));
        store.reject("u2", "u1");

        assert!(store.check_pending_call("u2").is_none());
        assert!(store.fetch_signal("u2", "u1").is_none());
    }

    #[test]
    fn test_reject_nonexistent_call_is_noop() {
        let (store, _) = test_store();
        store.reject("u2", "u1");
        assert!(store.check_pending_call("u2").is_none());
    }

    #[test]
    fn test_pairs_are_independent() {
        let (store, _) = test_store();

        store.post_signal("u1", "Alice", "u2", SignalKind::Candidate, json!({"to": "u2"}));
        store.post_signal("u1", "Alice", "u3", SignalKind::Candidate, json!({"to": "u3"}));
        store.post_signal("u3", "Carol", "u2", SignalKind::Candidate, json!({"from": "u3"}));

        assert_eq!(store.fetch_signal("u2", "u1").unwrap().payload, json!({"to": "u2"}));
        assert_eq!(store.fetch_signal("u3", "u1").unwrap().payload, json!({"to": "u3"}));
        assert_eq!(store.fetch_signal("u2", "u3").unwrap().payload, json!({"from": "u3"}));
    }

    #[test]
    fn test_multiple_callers_surface_exactly_one() {
        let (store, _) = test_store();

        store.post_signal("u1", "Alice", "u3", SignalKind::Offer, json!({}));
        store.post_signal("u2", "Bob", "u3", SignalKind::Offer, json!({}));

        let first = store.check_pending_call("u3").unwrap();
        assert!(first.caller_id == "u1" || first.caller_id == "u2");

        // Consuming the surfaced call leaves the other one ringing
        store.fetch_signal("u3", &first.caller_id).unwrap();
        let second = store.check_pending_call("u3").unwrap();
        assert_ne!(second.caller_id, first.caller_id);
    }

    #[test]
    fn test_repeat_offer_refreshes_pending_call() {
        let (store, clock) = test_store();

        store.post_signal("u1", "Alice", "u2", SignalKind::Offer, json!({"try": 1}));
        clock.advance_secs(45);
        store.post_signal("u1", "Alice", "u2", SignalKind::Offer, json!({"try": 2}));
        clock.advance_secs(30);

        // 75s after the first offer, but only 30s after the retry
        let call = store.check_pending_call("u2").unwrap();
        assert_eq!(call.payload, json!({"try": 2}));
    }

    #[test]
    fn test_presence_tracks_actors() {
        let (store, _) = test_store();

        store.post_signal("u1", "Alice", "u2", SignalKind::Candidate, json!({}));
        store.fetch_signal("u2", "u1");

        // u1 was seen as sender, u2 as polling receiver
        let users = store.active_users();
        let ids: Vec<&str> = users.iter().map(|u| u.user_id.as_str()).collect();
        assert_eq!(ids, vec!["u1", "u2"]);
    }

    #[test]
    fn test_active_users_drops_stale_records() {
        let (store, clock) = test_store();

        store.post_signal("u1", "Alice", "u2", SignalKind::Candidate, json!({}));
        clock.advance_secs(30);
        store.check_pending_call("u2");
        clock.advance_secs(45);

        // u1 last seen 75s ago, u2 45s ago
        let users = store.active_users();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].user_id, "u2");
        assert_eq!(users[0].age_secs, 45);
    }

    #[test]
    fn test_debug_snapshot_counts() {
        let (store, _) = test_store();

        store.post_signal("u1", "Alice", "u2", SignalKind::Offer, json!({}));
        store.post_signal("u3", "Carol", "u2", SignalKind::Candidate, json!({}));
        store.post_signal("u2", "Bob", "u1", SignalKind::Answer, json!({}));

        let snapshot = store.debug_snapshot();
        assert_eq!(snapshot.total_mailbox_entries, 3);
        assert_eq!(snapshot.total_pending_calls, 1);
        assert_eq!(snapshot.users["u2"].mailbox_entries, 2);
        assert_eq!(snapshot.users["u2"].pending_calls, 1);
        assert_eq!(snapshot.users["u1"].mailbox_entries, 1);
        assert_eq!(snapshot.users["u1"].pending_calls, 0);
    }

    #[test]
    fn test_full_handshake_flow() {
        let (store, _) = test_store();

        // Alice calls Bob
        store.post_signal("u1", "Alice", "u2", SignalKind::Offer, json!({"sdp": "offer"}));

        // Bob sees the call ringing, then takes the offer
        let call = store.check_pending_call("u2").unwrap();
        assert_eq!(call.caller_name, "Alice");
        let offer = store.fetch_signal("u2", "u1").unwrap();
        assert_eq!(offer.payload, json!({"sdp": "offer"}));
        assert!(store.check_pending_call("u2").is_none());

        // Bob answers; Alice picks it up
        store.post_signal("u2", "Bob", "u1", SignalKind::Answer, json!({"sdp": "answer"}));
        let answer = store.fetch_signal("u1", "u2").unwrap();
        assert_eq!(answer.kind, SignalKind::Answer);
        assert_eq!(answer.payload, json!({"sdp": "answer"}));
        assert!(store.fetch_signal("u1", "u2").is_none());

        // Candidates flow both ways alongside
        store.post_signal("u1", "Alice", "u2", SignalKind::Candidate, json!({"c": "a"}));
        store.post_signal("u2", "Bob", "u1", SignalKind::Candidate, json!({"c": "b"}));
        assert_eq!(store.fetch_signal("u2", "u1").unwrap().payload, json!({"c": "a"}));
        assert_eq!(store.fetch_signal("u1", "u2").unwrap().payload, json!({"c": "b"}));
    }

    #[test]
    fn test_concurrent_fetchers_deliver_once() {
        use std::thread;

        let (store, _) = test_store();
        store.post_signal("u1", "Alice", "u2", SignalKind::Candidate, json!({}));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || store.fetch_signal("u2", "u1").is_some())
            })
            .collect();

        let delivered = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&got| got)
            .count();
        assert_eq!(delivered, 1);
    }
}
