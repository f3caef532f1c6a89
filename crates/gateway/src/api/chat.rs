//! Chat API endpoints — the primary interface for running agent turns.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::runtime::bus::EventBus;
use crate::runtime::events::{value_is_terminal, StreamFrame};
use crate::runtime::tasks::{submit_turn, TaskStatus, TurnRequest};
use crate::runtime::truncate_chars;
use crate::state::AppState;

/// Build a standardized JSON error response: `{ "error": "<message>" }`.
fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/chat/messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn send_message(
    State(state): State<AppState>,
    Json(request): Json<TurnRequest>,
) -> Response {
    // Pre-flight: reject early when no LLM provider initialized.
    if state.llm.is_empty() {
        return api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "no LLM providers available — configure one under [[llm.providers]]",
        );
    }

    match submit_turn(&state, request) {
        Ok(handle) => Json(handle).into_response(),
        Err(e) => api_error(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/chat/tasks/:task_id/status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Serialize)]
struct TaskStatusResponse {
    task_id: String,
    status: TaskStatus,
    message_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub async fn task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Response {
    let Some(task) = state.tasks.get(&task_id) else {
        return api_error(StatusCode::NOT_FOUND, "task not found");
    };
    let row = state.chat.get_message(task.message_id);

    let content_preview = row
        .as_ref()
        .filter(|r| !r.content.is_empty())
        .map(|r| truncate_chars(&r.content, 100));
    let error = task
        .error
        .clone()
        .or_else(|| row.and_then(|r| r.error_message));

    Json(TaskStatusResponse {
        task_id,
        status: task.status,
        message_id: task.message_id,
        content_preview,
        error,
    })
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/chat/tasks/:task_id/cancel
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Response {
    let cancelled = state.runner.cancel(&state, &task_id);
    Json(serde_json::json!({ "task_id": task_id, "cancelled": cancelled })).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/chat/messages/:message_id/stream (SSE)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// SSE catch-up semantics: subscribe to the bus first, read the durable
/// row once; a terminal row yields a full `status` frame plus `done`,
/// otherwise the partial content is sent for resume and the live tail is
/// forwarded until a terminal frame. The bus poll uses a 1-second timeout
/// so the stream stays interruptible.
pub async fn stream_message(
    State(state): State<AppState>,
    Path(message_id): Path<i64>,
) -> Sse<impl futures_core::Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        let channel = EventBus::turn_channel(message_id);
        // Subscribe before the row read so no frame is lost in between.
        let mut rx = state.bus.subscribe(&channel);

        let Some(row) = state.chat.get_message(message_id) else {
            yield Ok(frame_event(
                &StreamFrame::Error { message: "Message not found".into() }.to_value(),
            ));
            return;
        };

        if row.status.is_terminal() {
            yield Ok(frame_event(&StreamFrame::status_full(&row).to_value()));
            yield Ok(frame_event(&StreamFrame::Done {}.to_value()));
            return;
        }

        if !row.content.is_empty() {
            yield Ok(frame_event(&StreamFrame::status_partial(&row).to_value()));
        }

        loop {
            match tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
                Ok(Ok(frame)) => {
                    let terminal = value_is_terminal(&frame);
                    yield Ok(frame_event(&frame));
                    if terminal {
                        return;
                    }
                }
                Ok(Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped))) => {
                    // Overruns are acceptable: the durable row has the
                    // authoritative state, so just resynchronize.
                    tracing::debug!(message_id, skipped, "SSE subscriber lagged");
                    if let Some(row) = state.chat.get_message(message_id) {
                        yield Ok(frame_event(&StreamFrame::status_partial(&row).to_value()));
                    }
                }
                Ok(Err(tokio::sync::broadcast::error::RecvError::Closed)) => {
                    // Publisher went away; report the final row state.
                    if let Some(row) = state.chat.get_message(message_id) {
                        yield Ok(frame_event(&StreamFrame::status_full(&row).to_value()));
                    }
                    yield Ok(frame_event(&StreamFrame::Done {}.to_value()));
                    return;
                }
                Err(_elapsed) => {
                    // Poll timeout: loop again so disconnects are noticed.
                    continue;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn frame_event(frame: &serde_json::Value) -> Event {
    Event::default().data(frame.to_string())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session endpoints
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_sessions(State(state): State<AppState>) -> Response {
    Json(state.chat.list_sessions()).into_response()
}

pub async fn session_messages(
    State(state): State<AppState>,
    Path(session_id): Path<i64>,
) -> Response {
    if state.chat.get_session(session_id).is_none() {
        return api_error(StatusCode::NOT_FOUND, "session not found");
    }
    Json(state.chat.session_messages(session_id)).into_response()
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<i64>,
) -> Response {
    if state.chat.delete_session(session_id) {
        Json(serde_json::json!({ "deleted": session_id })).into_response()
    } else {
        api_error(StatusCode::NOT_FOUND, "session not found")
    }
}
