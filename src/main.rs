//! Call relay server binary.
//!
//! Serves the signaling API plus health and stats endpoints. All state is
//! in-memory; restarting the process drops every mailbox and pending call.

use axum::{extract::State, http::Method, response::IntoResponse, routing::get, Json, Router};
use clap::Parser;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use call_relay::signaling::{api, RelayConfig, SignalingStore};

// ── CLI Arguments ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "call-relay", version, about = "Polling relay for WebRTC call signaling")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 8080, env = "RELAY_PORT")]
    port: u16,

    /// Pending-call validity window in seconds
    #[arg(long, default_value_t = 60, env = "CALL_TTL_SECS")]
    call_ttl_secs: i64,

    /// Window within which a user counts as active, in seconds
    #[arg(long, default_value_t = 60, env = "PRESENCE_TTL_SECS")]
    presence_ttl_secs: i64,
}

// ── Entry Point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "call_relay=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();

    let config = RelayConfig {
        port: args.port,
        call_ttl_secs: args.call_ttl_secs,
        presence_ttl_secs: args.presence_ttl_secs,
    };
    let store = SignalingStore::new(config);

    // Build router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .with_state(store.clone())
        .merge(api::router(store))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", args.port);
    tracing::info!("Call relay server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app)
        .await
        .expect("Server error");
}

// ── Route Handlers ────────────────────────────────────────────────────────────

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "call-relay",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Statistics endpoint.
async fn stats_handler(State(store): State<SignalingStore>) -> impl IntoResponse {
    Json(json!({
        "activeUsers": store.active_users().len(),
        "pendingCalls": store.pending_call_count(),
        "mailboxEntries": store.mailbox_entry_count(),
        "timestamp": chrono::Utc::now().timestamp_millis(),
    }))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
