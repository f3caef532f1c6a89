//! Durable task supervisor.
//!
//! `submit_turn` synchronously creates the session row (if needed), the
//! user message, and the pending assistant message, then enqueues a
//! background worker. Workers run under a global semaphore with up to
//! `max_attempts` attempts per turn; an attempt that finds the assistant
//! row already terminal is a no-op, so restarts are idempotent. The task
//! record itself is ephemeral — the assistant row is the durable record.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use uuid::Uuid;

use ca_domain::error::{Error, Result};
use ca_storage::{ChatRole, ChatSession, MessageStatus};

use crate::runtime::bus::EventBus;
use crate::runtime::events::StreamFrame;
use crate::runtime::turn::{run_turn, TurnInput};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Started,
    Success,
    Failure,
    Retry,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: String,
    pub session_id: i64,
    pub message_id: i64,
    pub status: TaskStatus,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Task {
    fn new(session_id: i64, message_id: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id,
            message_id,
            status: TaskStatus::Pending,
            attempts: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task store (in-memory, ephemeral)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct TaskStore {
    tasks: RwLock<HashMap<String, Task>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, task: Task) {
        self.tasks.write().insert(task.id.clone(), task);
    }

    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.tasks.read().get(task_id).cloned()
    }

    pub fn update<F>(&self, task_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut Task),
    {
        let mut tasks = self.tasks.write();
        match tasks.get_mut(task_id) {
            Some(task) => {
                f(task);
                true
            }
            None => false,
        }
    }

    /// Remove terminal tasks older than the given duration.
    pub fn evict_terminal(&self, older_than: chrono::Duration) {
        let cutoff = Utc::now() - older_than;
        self.tasks.write().retain(|_, t| {
            !t.status.is_terminal() || t.completed_at.map_or(true, |ts| ts > cutoff)
        });
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn submission
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A client turn request.
#[derive(Debug, Clone, Deserialize)]
pub struct TurnRequest {
    #[serde(default)]
    pub session_id: Option<i64>,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    pub message: String,
    #[serde(default)]
    pub patient_id: Option<i64>,
    #[serde(default)]
    pub record_id: Option<i64>,
}

fn default_user_id() -> String {
    "default".into()
}

/// The handle returned to the client.
#[derive(Debug, Clone, Serialize)]
pub struct TurnHandle {
    pub task_id: String,
    pub message_id: i64,
    pub session_id: i64,
    pub status: String,
}

/// Create the rows for a turn and enqueue its worker.
///
/// Synchronous part of the supervisor contract: when this returns, the
/// session exists, the user message is stored, and the assistant row is
/// `pending` with its task id attached.
pub fn submit_turn(state: &AppState, request: TurnRequest) -> Result<TurnHandle> {
    if request.message.trim().is_empty() {
        return Err(Error::Other("message cannot be empty".into()));
    }

    let session: ChatSession = request
        .session_id
        .and_then(|id| state.chat.get_session(id))
        .unwrap_or_else(|| state.chat.create_session(&request.message));

    state.chat.create_message(
        session.id,
        ChatRole::User,
        &request.message,
        MessageStatus::Completed,
    );
    let assistant =
        state
            .chat
            .create_message(session.id, ChatRole::Assistant, "", MessageStatus::Pending);

    let task = Task::new(session.id, assistant.id);
    let task_id = task.id.clone();
    state.chat.update_message(assistant.id, |m| {
        m.task_id = Some(task_id.clone());
    });
    state.tasks.insert(task);

    let input = TurnInput {
        session_id: session.id,
        message_id: assistant.id,
        user_id: request.user_id,
        user_message: request.message,
        patient_id: request.patient_id,
        record_id: request.record_id,
        task_id: task_id.clone(),
    };
    state.runner.enqueue(state.clone(), input);

    tracing::info!(
        task_id = %task_id,
        session_id = session.id,
        message_id = assistant.id,
        "turn enqueued"
    );

    Ok(TurnHandle {
        task_id,
        message_id: assistant.id,
        session_id: session.id,
        status: "pending".into(),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task runner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TaskRunner {
    /// Global semaphore bounding concurrent turn workers.
    semaphore: Arc<Semaphore>,
    max_attempts: u32,
}

impl TaskRunner {
    pub fn new(max_concurrent: usize, max_attempts: u32) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.clamp(1, 20))),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Spawn the worker for a turn: wait for a permit, run up to
    /// `max_attempts` attempts, then settle the task from the assistant
    /// row's terminal status.
    pub fn enqueue(&self, state: AppState, input: TurnInput) {
        let semaphore = self.semaphore.clone();
        let max_attempts = self.max_attempts;

        tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                settle_failure(&state, &input, "worker pool shut down");
                return;
            };

            let task_id = input.task_id.clone();
            state.tasks.update(&task_id, |t| {
                t.status = TaskStatus::Started;
                t.started_at = Some(Utc::now());
            });

            for attempt in 1..=max_attempts {
                state.tasks.update(&task_id, |t| t.attempts = attempt);

                let cancel = state.cancel_map.register(&task_id);
                let result = run_turn(&state, &input, cancel).await;
                state.cancel_map.remove(&task_id);

                match result {
                    Ok(()) => {
                        settle_from_row(&state, &input);
                        return;
                    }
                    Err(e) if attempt < max_attempts => {
                        tracing::warn!(
                            task_id = %task_id,
                            attempt,
                            error = %e,
                            "turn attempt failed, retrying"
                        );
                        state.tasks.update(&task_id, |t| {
                            t.status = TaskStatus::Retry;
                            t.error = Some(e.to_string());
                        });
                    }
                    Err(e) => {
                        tracing::error!(
                            task_id = %task_id,
                            attempts = max_attempts,
                            error = %e,
                            "turn failed after final attempt"
                        );
                        settle_failure(&state, &input, &e.to_string());
                        return;
                    }
                }
            }
        });
    }

    /// Cancel a running attempt by task id.
    pub fn cancel(&self, state: &AppState, task_id: &str) -> bool {
        state.cancel_map.cancel(task_id)
    }
}

/// Settle the task record from the assistant row the turn left behind.
fn settle_from_row(state: &AppState, input: &TurnInput) {
    let row = state.chat.get_message(input.message_id);
    let (status, error) = match row.as_ref().map(|r| r.status) {
        Some(MessageStatus::Completed) => (TaskStatus::Success, None),
        Some(MessageStatus::Error) | Some(MessageStatus::Interrupted) => (
            TaskStatus::Failure,
            row.as_ref().and_then(|r| r.error_message.clone()),
        ),
        // The turn returned without reaching a terminal row; treat as
        // success to avoid clobbering a concurrently-settled task.
        _ => (TaskStatus::Success, None),
    };
    state.tasks.update(&input.task_id, |t| {
        t.status = status;
        t.error = error;
        t.completed_at = Some(Utc::now());
    });
}

/// Reconcile terminal state when every attempt failed before the turn
/// could write its own terminal row.
fn settle_failure(state: &AppState, input: &TurnInput, message: &str) {
    let channel = EventBus::turn_channel(input.message_id);
    state.chat.update_message(input.message_id, |m| {
        if !m.status.is_terminal() {
            m.error_message = Some(message.to_string());
            m.transition(MessageStatus::Error);
        }
    });
    state.bus.publish(
        &channel,
        StreamFrame::Error {
            message: message.to_string(),
        }
        .to_value(),
    );
    state.bus.close(&channel);
    state.tasks.update(&input.task_id, |t| {
        t.status = TaskStatus::Failure;
        t.error = Some(message.to_string());
        t.completed_at = Some(Utc::now());
    });
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::testutil::{test_state, MockProvider, ScriptedReply};
    use std::time::Duration;

    async fn wait_terminal(state: &AppState, task_id: &str) -> Task {
        for _ in 0..200 {
            if let Some(task) = state.tasks.get(task_id) {
                if task.status.is_terminal() {
                    return task;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {task_id} never reached a terminal status");
    }

    // ── Status / store ─────────────────────────────────────────────

    #[test]
    fn status_serializes_celery_style() {
        assert_eq!(serde_json::to_string(&TaskStatus::Pending).unwrap(), "\"PENDING\"");
        assert_eq!(serde_json::to_string(&TaskStatus::Started).unwrap(), "\"STARTED\"");
        assert_eq!(serde_json::to_string(&TaskStatus::Success).unwrap(), "\"SUCCESS\"");
        assert_eq!(serde_json::to_string(&TaskStatus::Failure).unwrap(), "\"FAILURE\"");
        assert_eq!(serde_json::to_string(&TaskStatus::Retry).unwrap(), "\"RETRY\"");
    }

    #[test]
    fn status_terminal_set() {
        assert!(TaskStatus::Success.is_terminal());
        assert!(TaskStatus::Failure.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Started.is_terminal());
        assert!(!TaskStatus::Retry.is_terminal());
    }

    #[test]
    fn store_insert_update_evict() {
        let store = TaskStore::new();
        let task = Task::new(1, 2);
        let id = task.id.clone();
        store.insert(task);

        assert!(store.update(&id, |t| {
            t.status = TaskStatus::Success;
            t.completed_at = Some(Utc::now() - chrono::Duration::hours(2));
        }));
        assert!(!store.update("ghost", |_| {}));

        store.evict_terminal(chrono::Duration::hours(1));
        assert!(store.get(&id).is_none());
        assert!(store.is_empty());
    }

    // ── submit_turn ────────────────────────────────────────────────

    #[tokio::test]
    async fn submit_creates_rows_and_task() {
        let provider = MockProvider::new(vec![ScriptedReply::content("hello")]);
        let (_dir, state) = test_state(provider);

        let handle = submit_turn(
            &state,
            TurnRequest {
                session_id: None,
                user_id: "default".into(),
                message: "Who is patient 23?".into(),
                patient_id: None,
                record_id: None,
            },
        )
        .unwrap();

        assert_eq!(handle.status, "pending");
        let session = state.chat.get_session(handle.session_id).unwrap();
        assert_eq!(session.title, "Who is patient 23?");

        let rows = state.chat.session_messages(handle.session_id);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].role, ChatRole::User);
        assert_eq!(rows[1].role, ChatRole::Assistant);
        assert_eq!(rows[1].task_id.as_deref(), Some(handle.task_id.as_str()));

        let task = wait_terminal(&state, &handle.task_id).await;
        assert_eq!(task.status, TaskStatus::Success);

        let row = state.chat.get_message(handle.message_id).unwrap();
        assert_eq!(row.status, MessageStatus::Completed);
        assert_eq!(row.content, "hello");
    }

    #[tokio::test]
    async fn submit_rejects_empty_message() {
        let provider = MockProvider::new(vec![]);
        let (_dir, state) = test_state(provider);
        assert!(submit_turn(
            &state,
            TurnRequest {
                session_id: None,
                user_id: "default".into(),
                message: "   ".into(),
                patient_id: None,
                record_id: None,
            },
        )
        .is_err());
    }

    #[tokio::test]
    async fn submit_reuses_existing_session() {
        let provider = MockProvider::new(vec![
            ScriptedReply::content("one"),
            ScriptedReply::content("two"),
        ]);
        let (_dir, state) = test_state(provider);

        let first = submit_turn(
            &state,
            TurnRequest {
                session_id: None,
                user_id: "default".into(),
                message: "first".into(),
                patient_id: None,
                record_id: None,
            },
        )
        .unwrap();
        wait_terminal(&state, &first.task_id).await;

        let second = submit_turn(
            &state,
            TurnRequest {
                session_id: Some(first.session_id),
                user_id: "default".into(),
                message: "second".into(),
                patient_id: None,
                record_id: None,
            },
        )
        .unwrap();
        assert_eq!(second.session_id, first.session_id);
        wait_terminal(&state, &second.task_id).await;

        assert_eq!(state.chat.session_messages(first.session_id).len(), 4);
    }

    // ── Failure reconciliation ─────────────────────────────────────

    #[tokio::test]
    async fn handled_provider_error_settles_task_failure() {
        let provider = MockProvider::failing("boom");
        let (_dir, state) = test_state(provider);

        let handle = submit_turn(
            &state,
            TurnRequest {
                session_id: None,
                user_id: "default".into(),
                message: "hi".into(),
                patient_id: None,
                record_id: None,
            },
        )
        .unwrap();

        let task = wait_terminal(&state, &handle.task_id).await;
        assert_eq!(task.status, TaskStatus::Failure);
        assert!(task.error.unwrap().contains("boom"));

        let row = state.chat.get_message(handle.message_id).unwrap();
        assert_eq!(row.status, MessageStatus::Error);
    }

    #[tokio::test]
    async fn terminal_row_short_circuits_retries() {
        let provider = MockProvider::new(vec![ScriptedReply::content("unused")]);
        let (_dir, state) = test_state(provider.clone());

        let session = state.chat.create_session("s");
        let assistant = state.chat.create_message(
            session.id,
            ChatRole::Assistant,
            "finished elsewhere",
            MessageStatus::Completed,
        );

        let task = Task::new(session.id, assistant.id);
        let task_id = task.id.clone();
        state.tasks.insert(task);
        state.runner.enqueue(
            state.clone(),
            TurnInput {
                session_id: session.id,
                message_id: assistant.id,
                user_id: "default".into(),
                user_message: "s".into(),
                patient_id: None,
                record_id: None,
                task_id: task_id.clone(),
            },
        );

        let settled = wait_terminal(&state, &task_id).await;
        assert_eq!(settled.status, TaskStatus::Success);
        assert_eq!(settled.attempts, 1);
        assert_eq!(provider.call_count(), 0);
        let row = state.chat.get_message(assistant.id).unwrap();
        assert_eq!(row.content, "finished elsewhere");
    }

    #[tokio::test]
    async fn unstartable_turn_retries_then_reconciles_error_row() {
        // No rows exist for this input, so every attempt errors before
        // the turn can write a terminal row.
        let provider = MockProvider::new(vec![]);
        let (_dir, state) = test_state(provider);

        let session = state.chat.create_session("s");
        let assistant =
            state
                .chat
                .create_message(session.id, ChatRole::Assistant, "", MessageStatus::Pending);
        // Point the worker at a missing row id.
        let task = Task::new(session.id, assistant.id + 100);
        let task_id = task.id.clone();
        state.tasks.insert(task);
        state.runner.enqueue(
            state.clone(),
            TurnInput {
                session_id: session.id,
                message_id: assistant.id + 100,
                user_id: "default".into(),
                user_message: "s".into(),
                patient_id: None,
                record_id: None,
                task_id: task_id.clone(),
            },
        );

        let settled = wait_terminal(&state, &task_id).await;
        assert_eq!(settled.status, TaskStatus::Failure);
        assert_eq!(settled.attempts, 3);
    }

    #[tokio::test]
    async fn cancel_running_task_interrupts_turn() {
        let provider = MockProvider::stalling(Duration::from_secs(30));
        let (_dir, state) = test_state(provider);

        let handle = submit_turn(
            &state,
            TurnRequest {
                session_id: None,
                user_id: "default".into(),
                message: "long running".into(),
                patient_id: None,
                record_id: None,
            },
        )
        .unwrap();

        // Wait for the attempt to register its cancel token, then cancel.
        for _ in 0..100 {
            if state.cancel_map.is_running(&handle.task_id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(state.runner.cancel(&state, &handle.task_id));

        let task = wait_terminal(&state, &handle.task_id).await;
        assert_eq!(task.status, TaskStatus::Failure);
        let row = state.chat.get_message(handle.message_id).unwrap();
        assert_eq!(row.status, MessageStatus::Interrupted);
    }
}
