//! HTTP API surface.
//!
//! - `POST /api/chat/messages` — accept a turn, return a task handle
//! - `GET  /api/chat/messages/:id/stream` — SSE stream with catch-up
//! - `GET  /api/chat/tasks/:id/status` — task status + content preview
//! - `POST /api/chat/tasks/:id/cancel` — cancel a running turn
//! - session listing/detail/delete, specialist and tool listings

pub mod agents;
pub mod chat;
pub mod tools;

use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/chat/messages", post(chat::send_message))
        .route(
            "/api/chat/messages/:message_id/stream",
            get(chat::stream_message),
        )
        .route("/api/chat/tasks/:task_id/status", get(chat::task_status))
        .route("/api/chat/tasks/:task_id/cancel", post(chat::cancel_task))
        .route("/api/chat/sessions", get(chat::list_sessions))
        .route(
            "/api/chat/sessions/:session_id/messages",
            get(chat::session_messages),
        )
        .route("/api/chat/sessions/:session_id", delete(chat::delete_session))
        .route("/api/agents", get(agents::list_agents))
        .route("/api/tools", get(tools::list_tools))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}
