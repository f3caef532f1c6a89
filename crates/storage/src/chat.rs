//! Chat sessions and messages.
//!
//! The assistant row is the durable record of a turn: it is created in
//! `pending` before any worker starts, transitions through `streaming`,
//! and ends in exactly one terminal status. Incremental flushes update
//! content and buffers without touching the status.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use ca_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Streaming,
    Completed,
    Error,
    Interrupted,
}

impl MessageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Interrupted)
    }

    /// Whether moving to `next` respects the
    /// `pending → streaming → terminal` lifecycle. Terminal rows never
    /// move again.
    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        match self {
            Self::Pending => matches!(
                next,
                Self::Streaming | Self::Error | Self::Interrupted
            ),
            Self::Streaming => next.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Interrupted => "interrupted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rows
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: i64,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub session_id: i64,
    pub role: ChatRole,
    pub content: String,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls_json: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_references_json: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs_json: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage_json: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ChatMessage {
    /// Apply a lifecycle transition. Returns false (and leaves the row
    /// untouched) when the move would violate the
    /// `pending → streaming → terminal` order.
    pub fn transition(&mut self, next: MessageStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.last_updated_at = Utc::now();
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        true
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default, Serialize, Deserialize)]
struct ChatState {
    next_session_id: i64,
    next_message_id: i64,
    sessions: HashMap<i64, ChatSession>,
    messages: HashMap<i64, ChatMessage>,
}

/// Chat store backed by a JSON file (`chat.json` under the state path).
pub struct ChatStore {
    path: PathBuf,
    state: RwLock<ChatState>,
}

impl ChatStore {
    /// Load or create the store at `state_path/chat.json`.
    pub fn new(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;
        let path = state_path.join("chat.json");
        let state = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            ChatState::default()
        };

        tracing::info!(
            sessions = state.sessions.len(),
            messages = state.messages.len(),
            path = %path.display(),
            "chat store loaded"
        );

        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    fn persist_locked(&self, state: &ChatState) {
        match serde_json::to_string_pretty(state) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.path, json) {
                    tracing::warn!(error = %e, path = %self.path.display(), "chat store write failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "chat store serialization failed"),
        }
    }

    // ── Sessions ────────────────────────────────────────────────────

    /// Create a new session. The title is derived from the first user
    /// message (truncated to 50 chars).
    pub fn create_session(&self, first_message: &str) -> ChatSession {
        let title = if first_message.chars().count() > 50 {
            let prefix: String = first_message.chars().take(50).collect();
            format!("{prefix}...")
        } else {
            first_message.to_string()
        };

        let mut state = self.state.write();
        state.next_session_id += 1;
        let now = Utc::now();
        let session = ChatSession {
            id: state.next_session_id,
            title,
            created_at: now,
            updated_at: now,
        };
        state.sessions.insert(session.id, session.clone());
        self.persist_locked(&state);
        session
    }

    pub fn get_session(&self, id: i64) -> Option<ChatSession> {
        self.state.read().sessions.get(&id).cloned()
    }

    /// All sessions, most recently updated first.
    pub fn list_sessions(&self) -> Vec<ChatSession> {
        let state = self.state.read();
        let mut sessions: Vec<_> = state.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions
    }

    /// Delete a session and all its messages. Returns false if absent.
    pub fn delete_session(&self, id: i64) -> bool {
        let mut state = self.state.write();
        if state.sessions.remove(&id).is_none() {
            return false;
        }
        state.messages.retain(|_, m| m.session_id != id);
        self.persist_locked(&state);
        true
    }

    // ── Messages ────────────────────────────────────────────────────

    /// Append a message row. User/system rows are created `completed`;
    /// the assistant row of a new turn is created `pending`.
    pub fn create_message(
        &self,
        session_id: i64,
        role: ChatRole,
        content: &str,
        status: MessageStatus,
    ) -> ChatMessage {
        let mut state = self.state.write();
        state.next_message_id += 1;
        let now = Utc::now();
        let message = ChatMessage {
            id: state.next_message_id,
            session_id,
            role,
            content: content.to_string(),
            status,
            created_at: now,
            last_updated_at: now,
            tool_calls_json: None,
            reasoning: None,
            patient_references_json: None,
            logs_json: None,
            token_usage_json: None,
            task_id: None,
            streaming_started_at: None,
            completed_at: None,
            error_message: None,
        };
        state.messages.insert(message.id, message.clone());
        if let Some(session) = state.sessions.get_mut(&session_id) {
            session.updated_at = now;
        }
        self.persist_locked(&state);
        message
    }

    pub fn get_message(&self, id: i64) -> Option<ChatMessage> {
        self.state.read().messages.get(&id).cloned()
    }

    /// Find the message carrying the given task id.
    pub fn find_by_task_id(&self, task_id: &str) -> Option<ChatMessage> {
        self.state
            .read()
            .messages
            .values()
            .find(|m| m.task_id.as_deref() == Some(task_id))
            .cloned()
    }

    /// Messages of a session ordered by creation time.
    pub fn session_messages(&self, session_id: i64) -> Vec<ChatMessage> {
        let state = self.state.read();
        let mut messages: Vec<_> = state
            .messages
            .values()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        messages
    }

    /// Update a single message row in-place and write it out. This is the
    /// incremental-flush path: the closure mutates the row, then the store
    /// advances `last_updated_at` and persists.
    ///
    /// Returns the updated row, or None if the id is unknown.
    pub fn update_message<F>(&self, id: i64, f: F) -> Option<ChatMessage>
    where
        F: FnOnce(&mut ChatMessage),
    {
        let mut state = self.state.write();
        let message = state.messages.get_mut(&id)?;
        f(message);
        message.last_updated_at = Utc::now();
        let updated = message.clone();
        self.persist_locked(&state);
        Some(updated)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
