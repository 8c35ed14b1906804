use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post},
};

use super::dispatcher::{Dispatch, EventDispatcher};
use super::event::InboundEvent;
use crate::errors::WebhookError;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub dispatcher: EventDispatcher,
    pub port: u16,
}

pub type SharedState = Arc<AppState>;

// ── Router ────────────────────────────────────────────────────────────

/// Largest webhook delivery accepted, matching GitHub's payload cap.
pub const WEBHOOK_BODY_LIMIT: usize = 25 * 1024 * 1024;

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route(
            "/webhook",
            post(webhook).layer(DefaultBodyLimit::max(WEBHOOK_BODY_LIMIT)),
        )
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn index(State(state): State<SharedState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "Push-to-Grade API",
        "port": state.port,
    }))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// Responds as soon as the delivery is verified and scheduled. Grading
/// results never reach the caller.
async fn webhook(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, WebhookError> {
    let event = InboundEvent::new(headers, body);
    let body = match state.dispatcher.dispatch(event)? {
        Dispatch::Accepted { .. } => serde_json::json!({"accepted": true}),
        Dispatch::Ignored { .. } => serde_json::json!({"ignored": true}),
    };
    Ok(Json(body))
}
