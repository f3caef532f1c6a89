//! Event shapes: the internal agent-event channel (graph → turn runtime)
//! and the JSON wire frames published on the event bus for consumers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use ca_domain::stream::Usage;
use ca_storage::ChatMessage;

use crate::runtime::detector::PatientReference;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Internal agent events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A structured log line surfaced to consumers (specialist progress, tool
/// timing). `duration` is human-formatted, e.g. `"1.2s"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub message: String,
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

impl LogEntry {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: "info".into(),
            duration: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: "error".into(),
            duration: None,
        }
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration = Some(format!("{secs:.1}s"));
        self
    }
}

/// Events produced by the graph engine, consumed by the turn runtime.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Incremental assistant text.
    Content { text: String },
    /// Reasoning/thinking content from the model.
    Reasoning { text: String },
    /// The model is invoking a tool.
    ToolCall {
        id: String,
        name: String,
        args: Value,
    },
    /// Tool execution result (the text the LLM sees).
    ToolResult { id: String, result: String },
    /// Progress log line.
    Log(LogEntry),
    /// Token usage for one LLM call.
    Usage(Usage),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire frames
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A frame published on the bus channel / emitted over SSE. One JSON
/// object per frame, discriminated by `type`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum StreamFrame {
    #[serde(rename = "status")]
    Status {
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reasoning: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        logs: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        patient_references: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<Value>,
    },
    #[serde(rename = "content")]
    Content { content: String },
    #[serde(rename = "tool_call")]
    ToolCall { id: String, tool: String, args: Value },
    #[serde(rename = "tool_result")]
    ToolResult { id: String, result: String },
    #[serde(rename = "log")]
    Log { content: LogEntry },
    #[serde(rename = "usage")]
    Usage { usage: Usage },
    #[serde(rename = "patient_references")]
    PatientReferences {
        patient_references: Vec<PatientReference>,
    },
    #[serde(rename = "done")]
    Done {},
    #[serde(rename = "error")]
    Error { message: String },
}

fn parse_json_column(raw: &Option<String>) -> Option<Value> {
    raw.as_deref().and_then(|s| serde_json::from_str(s).ok())
}

impl StreamFrame {
    /// The full-row `status` frame sent to a consumer catching up on a
    /// terminal turn.
    pub fn status_full(row: &ChatMessage) -> Self {
        StreamFrame::Status {
            status: row.status.as_str().into(),
            content: Some(row.content.clone()),
            tool_calls: parse_json_column(&row.tool_calls_json),
            reasoning: row.reasoning.clone(),
            logs: parse_json_column(&row.logs_json),
            patient_references: parse_json_column(&row.patient_references_json),
            error_message: row.error_message.clone(),
            usage: parse_json_column(&row.token_usage_json),
        }
    }

    /// The resume `status` frame: current status plus the persisted
    /// content prefix.
    pub fn status_partial(row: &ChatMessage) -> Self {
        StreamFrame::Status {
            status: row.status.as_str().into(),
            content: Some(row.content.clone()),
            tool_calls: None,
            reasoning: None,
            logs: None,
            patient_references: None,
            error_message: None,
            usage: None,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({"type": "error"}))
    }

    /// Whether this frame terminates a channel.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamFrame::Done {} | StreamFrame::Error { .. })
    }
}

/// Whether a raw bus frame is terminal (`done` or `error`).
pub fn value_is_terminal(frame: &Value) -> bool {
    matches!(
        frame.get("type").and_then(Value::as_str),
        Some("done") | Some("error")
    )
}
