//! Signaling REST API handlers.
//!
//! The short-polling boundary: clients post handshake signals and poll for
//! delivery. "Nothing waiting" is the normal steady state of polling and is
//! reported as a negative flag with 200, never as an error status. The only
//! hard errors are missing routing fields.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::store::SignalingStore;
use super::types::SignalKind;

// ── Request / Response Types ─────────────────────────────────────────────────

/// POST /api/signaling/send
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendSignalRequest {
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: String,
    pub receiver_id: String,
    #[serde(rename = "type")]
    pub kind: SignalKind,
    pub payload: Value,
}

/// POST /api/signaling/reject
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectRequest {
    pub sender_id: String,
    pub receiver_id: String,
}

/// Generic ack for side-effect-only operations.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AckResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// GET /api/signaling/fetch/:user_id/:from_user_id
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchSignalResponse {
    pub success: bool,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<SignalKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
}

/// GET /api/signaling/calls/:user_id
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCallResponse {
    pub has_incoming_call: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// One user in the active-users listing.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub last_active_at: i64,
    pub age_secs: i64,
}

/// GET /api/signaling/users/active
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveUsersResponse {
    pub users: BTreeMap<String, PresenceEntry>,
    pub count: usize,
}

fn bad_request(msg: &str) -> (StatusCode, Json<AckResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(AckResponse {
            success: false,
            error: Some(msg.to_string()),
        }),
    )
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// POST /api/signaling/send — Store a signal in the receiver's mailbox.
///
/// An `offer` additionally registers a pending call for the receiver.
/// Payloads are opaque and never validated beyond being JSON.
pub async fn send_signal(
    State(store): State<SignalingStore>,
    Json(req): Json<SendSignalRequest>,
) -> impl IntoResponse {
    if req.sender_id.trim().is_empty() || req.receiver_id.trim().is_empty() {
        return bad_request("senderId and receiverId are required");
    }

    store.post_signal(
        &req.sender_id,
        &req.sender_name,
        &req.receiver_id,
        req.kind,
        req.payload,
    );

    (
        StatusCode::OK,
        Json(AckResponse {
            success: true,
            error: None,
        }),
    )
}

/// GET /api/signaling/fetch/:user_id/:from_user_id — Consume the signal
/// waiting for `user_id` from `from_user_id`, if any.
pub async fn fetch_signal(
    State(store): State<SignalingStore>,
    Path((user_id, from_user_id)): Path<(String, String)>,
) -> impl IntoResponse {
    match store.fetch_signal(&user_id, &from_user_id) {
        Some(signal) => Json(FetchSignalResponse {
            success: true,
            kind: Some(signal.kind),
            payload: Some(signal.payload),
            sender_name: Some(signal.sender_name),
        }),
        None => Json(FetchSignalResponse {
            success: false,
            kind: None,
            payload: None,
            sender_name: None,
        }),
    }
}

/// GET /api/signaling/calls/:user_id — Poll for an incoming call.
///
/// Does not consume the invitation; the receiver answers by fetching the
/// offer signal, or declines via reject.
pub async fn check_pending_calls(
    State(store): State<SignalingStore>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    match store.check_pending_call(&user_id) {
        Some(call) => Json(PendingCallResponse {
            has_incoming_call: true,
            caller_id: Some(call.caller_id),
            caller_name: Some(call.caller_name),
            payload: Some(call.payload),
            timestamp: Some(call.timestamp),
        }),
        None => Json(PendingCallResponse {
            has_incoming_call: false,
            caller_id: None,
            caller_name: None,
            payload: None,
            timestamp: None,
        }),
    }
}

/// POST /api/signaling/reject — Decline an incoming call.
///
/// Clears the pending call and mailbox entry from `receiverId` as seen by
/// `senderId` (the rejecting party). Idempotent.
pub async fn reject_call(
    State(store): State<SignalingStore>,
    Json(req): Json<RejectRequest>,
) -> impl IntoResponse {
    if req.sender_id.trim().is_empty() || req.receiver_id.trim().is_empty() {
        return bad_request("senderId and receiverId are required");
    }

    store.reject(&req.sender_id, &req.receiver_id);

    (
        StatusCode::OK,
        Json(AckResponse {
            success: true,
            error: None,
        }),
    )
}

/// GET /api/signaling/users/active — Users seen within the presence window.
pub async fn active_users(State(store): State<SignalingStore>) -> impl IntoResponse {
    let users: BTreeMap<String, PresenceEntry> = store
        .active_users()
        .into_iter()
        .map(|u| {
            (
                u.user_id,
                PresenceEntry {
                    last_active_at: u.last_active_at,
                    age_secs: u.age_secs,
                },
            )
        })
        .collect();

    let count = users.len();
    Json(ActiveUsersResponse { users, count })
}

/// GET /api/signaling/debug — Per-user state counts, no payload contents.
pub async fn debug_state(State(store): State<SignalingStore>) -> impl IntoResponse {
    Json(store.debug_snapshot())
}

// ── Router ───────────────────────────────────────────────────────────────────

/// All signaling routes, bound to the given store.
pub fn router(store: SignalingStore) -> Router {
    Router::new()
        .route("/api/signaling/send", post(send_signal))
        .route("/api/signaling/fetch/:user_id/:from_user_id", get(fetch_signal))
        .route("/api/signaling/calls/:user_id", get(check_pending_calls))
        .route("/api/signaling/reject", post(reject_call))
        .route("/api/signaling/users/active", get(active_users))
        .route("/api/signaling/debug", get(debug_state))
        .with_state(store)
}
