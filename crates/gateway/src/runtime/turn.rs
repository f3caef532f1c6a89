//! Turn runtime — owns a single assistant turn.
//!
//! Drives the graph engine, feeds the entity detector, flushes the
//! assistant row incrementally (every 5 seconds or 50 events), publishes
//! wire frames on the turn's bus channel, and writes exactly one terminal
//! row. A worker restarted onto a terminal row performs no writes.

use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use ca_domain::error::{Error, Result};
use ca_domain::stream::Usage;
use ca_domain::tool::Message;
use ca_storage::{ChatMessage, ChatRole, MessageStatus, RecordKind};

use crate::runtime::bus::EventBus;
use crate::runtime::cancel::CancelToken;
use crate::runtime::detector::{PatientDetector, PatientReference};
use crate::runtime::events::{AgentEvent, StreamFrame};
use crate::runtime::graph::{run_graph, GraphContext, PatientProfile, TurnState};
use crate::runtime::specialists::SpecialistCatalogue;
use crate::runtime::{prompt, recall};
use crate::state::AppState;

const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const FLUSH_EVENT_THRESHOLD: usize = 50;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Input
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Input to a single turn. The assistant row (`message_id`) must already
/// exist in `pending` status.
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub session_id: i64,
    pub message_id: i64,
    pub user_id: String,
    pub user_message: String,
    pub patient_id: Option<i64>,
    pub record_id: Option<i64>,
    pub task_id: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Accumulators
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Serialize)]
struct ToolCallRecord {
    id: String,
    tool: String,
    args: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<String>,
}

#[derive(Default)]
struct Buffers {
    content: String,
    reasoning: String,
    tool_calls: Vec<ToolCallRecord>,
    logs: Vec<Value>,
    usage: Usage,
    references: Vec<PatientReference>,
}

impl Buffers {
    fn write_into(&self, row: &mut ChatMessage) {
        row.content = self.content.clone();
        row.tool_calls_json = (!self.tool_calls.is_empty())
            .then(|| serde_json::to_string(&self.tool_calls).unwrap_or_default());
        row.reasoning = (!self.reasoning.is_empty()).then(|| self.reasoning.clone());
        row.logs_json =
            (!self.logs.is_empty()).then(|| serde_json::to_string(&self.logs).unwrap_or_default());
        row.patient_references_json = (!self.references.is_empty())
            .then(|| serde_json::to_string(&self.references).unwrap_or_default());
        row.token_usage_json =
            (!self.usage.is_zero()).then(|| serde_json::to_string(&self.usage).unwrap_or_default());
    }

    fn log(&mut self, kind: &str, content: Value) {
        self.logs.push(serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "type": kind,
            "content": content,
        }));
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one turn to a terminal assistant row.
///
/// Returns `Ok` when the row reached (or already had) a terminal status —
/// including handled error and cancellation outcomes. `Err` means the
/// turn could not even start (missing row, no provider); the supervisor
/// retries those and reconciles the row if attempts run out.
pub async fn run_turn(state: &AppState, input: &TurnInput, cancel: CancelToken) -> Result<()> {
    let Some(row) = state.chat.get_message(input.message_id) else {
        return Err(Error::NotFound(format!(
            "assistant message {}",
            input.message_id
        )));
    };
    if row.status.is_terminal() {
        tracing::info!(
            message_id = input.message_id,
            status = row.status.as_str(),
            "turn already terminal, skipping"
        );
        return Ok(());
    }

    let Some(provider) = state.llm.default_provider() else {
        return Err(Error::Config("no LLM provider available".into()));
    };

    // Reconcile the registry with persisted tool records before binding.
    let http_timeout = Duration::from_secs(state.config.tools.http_timeout_sec);
    let natives = ca_tools::builtin::native_symbols(state.patients.clone(), http_timeout);
    ca_tools::loader::reconcile(
        &state.registry,
        &state.tool_records.list_enabled(),
        &natives,
        http_timeout,
    );

    // The catalogue is rebuilt from storage on every turn.
    let catalogue = SpecialistCatalogue::load(&state.specialists);

    // pending → streaming; task_id is set once and never changes.
    state.chat.update_message(input.message_id, |m| {
        m.transition(MessageStatus::Streaming);
        if m.task_id.is_none() {
            m.task_id = Some(input.task_id.clone());
        }
        m.streaming_started_at = Some(Utc::now());
    });

    let channel = EventBus::turn_channel(input.message_id);
    tracing::info!(
        message_id = input.message_id,
        session_id = input.session_id,
        task_id = %input.task_id,
        "turn started"
    );

    // ── Assemble the initial state ─────────────────────────────────
    let context_patient = input.patient_id.and_then(|id| state.patients.get(id));
    let patient_profile = context_patient.as_ref().map(|p| PatientProfile {
        id: p.id,
        name: p.name.clone(),
    });
    let mut detector = PatientDetector::new(context_patient, state.patients.list());

    let mut messages = Vec::new();
    let snippets = state
        .recall
        .recall(&input.user_message, &input.user_id)
        .await;
    if let Some(memory_context) = recall::render_snippets(&snippets) {
        messages.push(Message::system(memory_context));
    }
    messages.extend(load_history(state, input));
    messages.push(Message::user(build_context_message(state, input)));

    let turn_state = TurnState {
        messages,
        patient_profile,
        steps_taken: 0,
        next_agents: Vec::new(),
        final_report: None,
    };

    let ctx = GraphContext {
        provider,
        registry: state.registry.clone(),
        executor: state.executor.clone(),
        catalogue,
        system_prompt: state
            .config
            .agent
            .system_prompt
            .clone()
            .unwrap_or_else(prompt::default_system_prompt),
        temperature: state.config.llm.temperature,
        max_iterations: state.config.agent.max_iterations,
        max_concurrent_specialists: state.config.agent.max_concurrent_specialists,
        specialist_timeout: Duration::from_secs(state.config.agent.specialist_timeout_sec),
    };

    // ── Drive the graph, consuming its event stream ────────────────
    let (tx, mut rx) = mpsc::channel::<AgentEvent>(64);
    let graph = tokio::spawn(run_graph(ctx, turn_state, tx, cancel.clone()));

    let mut buffers = Buffers::default();
    let mut last_flush = Instant::now();
    let mut events_since_flush = 0usize;

    while let Some(event) = rx.recv().await {
        events_since_flush += 1;
        apply_event(state, &channel, &mut buffers, &mut detector, event);

        if last_flush.elapsed() >= FLUSH_INTERVAL || events_since_flush >= FLUSH_EVENT_THRESHOLD {
            flush_partial(state, input.message_id, &buffers);
            last_flush = Instant::now();
            events_since_flush = 0;
        }
    }

    let graph_result = graph.await;

    // Final detection pass over the complete text.
    let fresh = detector.pass(&buffers.content);
    if !fresh.is_empty() {
        buffers.references.extend(fresh.clone());
        publish(state, &channel, StreamFrame::PatientReferences {
            patient_references: fresh,
        });
    }

    // ── Terminal row + terminal frame ──────────────────────────────
    match graph_result {
        Ok(Ok(_)) => {
            finalize(state, input.message_id, &buffers, MessageStatus::Completed, None);
            publish(state, &channel, StreamFrame::Done {});
            tracing::info!(
                message_id = input.message_id,
                chars = buffers.content.len(),
                "turn completed"
            );
        }
        Ok(Err(Error::Cancelled(reason))) => {
            finalize(
                state,
                input.message_id,
                &buffers,
                MessageStatus::Interrupted,
                Some("Task was cancelled".into()),
            );
            publish(state, &channel, StreamFrame::Error {
                message: format!("cancelled: {reason}"),
            });
            tracing::info!(message_id = input.message_id, "turn interrupted");
        }
        Ok(Err(e)) => {
            let message = e.to_string();
            finalize(
                state,
                input.message_id,
                &buffers,
                MessageStatus::Error,
                Some(message.clone()),
            );
            publish(state, &channel, StreamFrame::Error { message: message.clone() });
            tracing::warn!(message_id = input.message_id, error = %message, "turn failed");
        }
        Err(join_error) => {
            let message = format!("turn worker panicked: {join_error}");
            finalize(
                state,
                input.message_id,
                &buffers,
                MessageStatus::Error,
                Some(message.clone()),
            );
            publish(state, &channel, StreamFrame::Error { message: message.clone() });
            tracing::error!(message_id = input.message_id, error = %message, "turn crashed");
        }
    }

    state.bus.close(&channel);
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn publish(state: &AppState, channel: &str, frame: StreamFrame) {
    state.bus.publish(channel, frame.to_value());
}

fn apply_event(
    state: &AppState,
    channel: &str,
    buffers: &mut Buffers,
    detector: &mut PatientDetector,
    event: AgentEvent,
) {
    match event {
        AgentEvent::Content { text } => {
            publish(state, channel, StreamFrame::Content {
                content: text.clone(),
            });
            buffers.content.push_str(&text);
            if detector.should_run(&text) {
                let fresh = detector.pass(&buffers.content);
                if !fresh.is_empty() {
                    buffers.references.extend(fresh.clone());
                    publish(state, channel, StreamFrame::PatientReferences {
                        patient_references: fresh,
                    });
                }
            }
        }
        AgentEvent::Reasoning { text } => {
            buffers.reasoning.push_str(&text);
        }
        AgentEvent::ToolCall { id, name, args } => {
            publish(state, channel, StreamFrame::ToolCall {
                id: id.clone(),
                tool: name.clone(),
                args: args.clone(),
            });
            buffers.tool_calls.push(ToolCallRecord {
                id,
                tool: name,
                args,
                result: None,
            });
        }
        AgentEvent::ToolResult { id, result } => {
            publish(state, channel, StreamFrame::ToolResult {
                id: id.clone(),
                result: result.clone(),
            });
            if let Some(record) = buffers.tool_calls.iter_mut().find(|r| r.id == id) {
                record.result = Some(result.clone());
            }
            buffers.log(
                "tool_result",
                serde_json::json!({"id": id, "result": result}),
            );
        }
        AgentEvent::Log(entry) => {
            publish(state, channel, StreamFrame::Log {
                content: entry.clone(),
            });
            buffers.log("log", serde_json::to_value(&entry).unwrap_or_default());
        }
        AgentEvent::Usage(usage) => {
            buffers.usage.add(&usage);
            publish(state, channel, StreamFrame::Usage { usage });
        }
    }
}

/// Incremental flush: current buffers, status untouched.
fn flush_partial(state: &AppState, message_id: i64, buffers: &Buffers) {
    state.chat.update_message(message_id, |m| {
        buffers.write_into(m);
    });
}

/// Terminal write: buffers plus the status transition (and error message).
fn finalize(
    state: &AppState,
    message_id: i64,
    buffers: &Buffers,
    status: MessageStatus,
    error_message: Option<String>,
) {
    state.chat.update_message(message_id, |m| {
        buffers.write_into(m);
        if let Some(err) = error_message {
            m.error_message = Some(err);
        }
        if !m.transition(status) {
            tracing::warn!(
                message_id,
                from = m.status.as_str(),
                to = status.as_str(),
                "refused invalid terminal transition"
            );
        }
    });
}

/// Prior messages of the session, excluding the assistant row being
/// written and anything with empty content.
fn load_history(state: &AppState, input: &TurnInput) -> Vec<Message> {
    state
        .chat
        .session_messages(input.session_id)
        .into_iter()
        .filter(|m| m.id != input.message_id && !m.content.trim().is_empty())
        .map(|m| match m.role {
            ChatRole::User => Message::user(m.content),
            ChatRole::Assistant => Message::assistant(m.content),
            ChatRole::System => Message::system(m.content),
        })
        .collect()
}

/// The user message with the patient/record context prefix, when set.
fn build_context_message(state: &AppState, input: &TurnInput) -> String {
    let Some(patient) = input.patient_id.and_then(|id| state.patients.get(id)) else {
        return input.user_message.clone();
    };

    let mut context = format!(
        "Context: Patient {} (DOB: {}, Gender: {}).\n\n",
        patient.name,
        patient.dob.as_deref().unwrap_or("unknown"),
        patient.gender.as_deref().unwrap_or("unknown"),
    );

    if let Some(record) = input.record_id.and_then(|id| state.patients.get_record(id)) {
        match record.kind {
            RecordKind::Text => {
                context.push_str("Focus Record: text\n");
                context.push_str(&format!("Content: {}\n", record.content));
            }
            RecordKind::Image => {
                context.push_str("Focus Record: image\n");
                context.push_str(&format!("Image File: {}\n", record.content));
                if let Some(summary) = &record.summary {
                    context.push_str(&format!("Metadata: {summary}\n"));
                }
            }
            RecordKind::Pdf => {
                context.push_str("Focus Record: pdf\n");
                context.push_str(&format!("PDF File: {}\n", record.content));
                if let Some(summary) = &record.summary {
                    context.push_str(&format!("Metadata: {summary}\n"));
                }
            }
        }
    }

    context.push_str(&format!("User Query: {}", input.user_message));
    context
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::events::value_is_terminal;
    use crate::runtime::testutil::{test_state, MockProvider, ScriptedReply};
    use ca_storage::Patient;

    fn turn_input(session_id: i64, message_id: i64) -> TurnInput {
        TurnInput {
            session_id,
            message_id,
            user_id: "default".into(),
            user_message: "hello".into(),
            patient_id: None,
            record_id: None,
            task_id: "task-1".into(),
        }
    }

    /// Create the user + pending assistant rows the supervisor would.
    fn seed_turn(state: &AppState, user_message: &str) -> TurnInput {
        let session = state.chat.create_session(user_message);
        state
            .chat
            .create_message(session.id, ChatRole::User, user_message, MessageStatus::Completed);
        let assistant = state.chat.create_message(
            session.id,
            ChatRole::Assistant,
            "",
            MessageStatus::Pending,
        );
        let mut input = turn_input(session.id, assistant.id);
        input.user_message = user_message.to_string();
        input
    }

    fn drain_channel(
        rx: &mut tokio::sync::broadcast::Receiver<Value>,
    ) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn completed_content_equals_concatenated_content_frames() {
        let provider = MockProvider::new(vec![
            ScriptedReply::content("The patient is stable.").with_usage(10, 6),
        ]);
        let (_dir, state) = test_state(provider);
        let input = seed_turn(&state, "status?");

        let mut rx = state.bus.subscribe(&EventBus::turn_channel(input.message_id));
        run_turn(&state, &input, CancelToken::new()).await.unwrap();

        let row = state.chat.get_message(input.message_id).unwrap();
        assert_eq!(row.status, MessageStatus::Completed);
        assert!(row.completed_at.is_some());
        assert_eq!(row.task_id.as_deref(), Some("task-1"));
        assert!(row.streaming_started_at.is_some());

        let frames = drain_channel(&mut rx);
        let streamed: String = frames
            .iter()
            .filter(|f| f["type"] == "content")
            .map(|f| f["content"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(row.content, streamed);
        assert_eq!(row.content, "The patient is stable.");

        // done is the last frame on the channel.
        assert!(value_is_terminal(frames.last().unwrap()));
        assert_eq!(frames.last().unwrap()["type"], "done");

        // Usage was accumulated and persisted.
        let usage: Usage = serde_json::from_str(&row.token_usage_json.unwrap()).unwrap();
        assert_eq!(usage.total_tokens, 16);
    }

    #[tokio::test]
    async fn terminal_row_restart_is_a_noop() {
        let provider = MockProvider::new(vec![ScriptedReply::content("should not run")]);
        let (_dir, state) = test_state(provider.clone());
        let input = seed_turn(&state, "hi");

        state.chat.update_message(input.message_id, |m| {
            m.content = "already done".into();
            m.transition(MessageStatus::Streaming);
            m.transition(MessageStatus::Completed);
        });
        let before = state.chat.get_message(input.message_id).unwrap();

        run_turn(&state, &input, CancelToken::new()).await.unwrap();

        let after = state.chat.get_message(input.message_id).unwrap();
        assert_eq!(after.content, "already done");
        assert_eq!(after.status, MessageStatus::Completed);
        assert_eq!(after.last_updated_at, before.last_updated_at);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn provider_failure_writes_error_row_and_error_frame() {
        let provider = MockProvider::failing("upstream 429");
        let (_dir, state) = test_state(provider);
        let input = seed_turn(&state, "hi");

        let mut rx = state.bus.subscribe(&EventBus::turn_channel(input.message_id));
        run_turn(&state, &input, CancelToken::new()).await.unwrap();

        let row = state.chat.get_message(input.message_id).unwrap();
        assert_eq!(row.status, MessageStatus::Error);
        assert!(row.error_message.as_deref().unwrap().contains("upstream 429"));

        let frames = drain_channel(&mut rx);
        let last = frames.last().unwrap();
        assert_eq!(last["type"], "error");
        assert!(last["message"].as_str().unwrap().contains("upstream 429"));
    }

    #[tokio::test]
    async fn cancellation_writes_interrupted_row() {
        let provider = MockProvider::new(vec![ScriptedReply::content("never")]);
        let (_dir, state) = test_state(provider);
        let input = seed_turn(&state, "hi");

        let cancel = CancelToken::new();
        cancel.cancel();
        let mut rx = state.bus.subscribe(&EventBus::turn_channel(input.message_id));
        run_turn(&state, &input, cancel).await.unwrap();

        let row = state.chat.get_message(input.message_id).unwrap();
        assert_eq!(row.status, MessageStatus::Interrupted);
        assert_eq!(row.error_message.as_deref(), Some("Task was cancelled"));

        let frames = drain_channel(&mut rx);
        assert_eq!(frames.last().unwrap()["type"], "error");
    }

    #[tokio::test]
    async fn patient_references_detected_and_persisted() {
        let provider = MockProvider::new(vec![ScriptedReply::content(
            "Patient John Smith remains stable. See Patient ID: 23 for history.",
        )]);
        let (_dir, state) = test_state(provider);
        state.patients.insert_patient(Patient {
            id: 23,
            name: "John Smith".into(),
            dob: Some("1962-04-11".into()),
            gender: Some("male".into()),
        });
        let mut input = seed_turn(&state, "Who is patient 23?");
        input.patient_id = Some(23);

        let mut rx = state.bus.subscribe(&EventBus::turn_channel(input.message_id));
        run_turn(&state, &input, CancelToken::new()).await.unwrap();

        let row = state.chat.get_message(input.message_id).unwrap();
        let refs: Vec<PatientReference> =
            serde_json::from_str(&row.patient_references_json.unwrap()).unwrap();
        assert_eq!(refs.len(), 2);
        assert!(refs.iter().all(|r| r.patient_id == 23));

        // Spans never overlap.
        for (i, a) in refs.iter().enumerate() {
            for b in refs.iter().skip(i + 1) {
                assert!(a.end_index <= b.start_index || b.end_index <= a.start_index);
            }
        }

        let frames = drain_channel(&mut rx);
        assert!(frames.iter().any(|f| f["type"] == "patient_references"));
    }

    #[tokio::test]
    async fn context_prefix_includes_patient_and_record() {
        let provider = MockProvider::new(vec![ScriptedReply::content("ok")]);
        let (_dir, state) = test_state(provider.clone());
        state.patients.insert_patient(Patient {
            id: 7,
            name: "Maria Garcia".into(),
            dob: Some("1980-02-02".into()),
            gender: Some("female".into()),
        });
        state.patients.insert_record(ca_storage::MedicalRecord {
            id: 4,
            patient_id: 7,
            kind: RecordKind::Text,
            content: "Echocardiogram normal.".into(),
            summary: None,
        });
        let mut input = seed_turn(&state, "summarize the record");
        input.patient_id = Some(7);
        input.record_id = Some(4);

        run_turn(&state, &input, CancelToken::new()).await.unwrap();

        let request = &provider.requests()[0];
        let user_text = request
            .messages
            .last()
            .unwrap()
            .content
            .extract_all_text();
        assert!(user_text.starts_with("Context: Patient Maria Garcia (DOB: 1980-02-02, Gender: female)."));
        assert!(user_text.contains("Content: Echocardiogram normal."));
        assert!(user_text.ends_with("User Query: summarize the record"));
    }

    #[tokio::test]
    async fn history_excludes_current_row_and_empty_rows() {
        let provider = MockProvider::new(vec![ScriptedReply::content("ok")]);
        let (_dir, state) = test_state(provider.clone());

        let session = state.chat.create_session("first");
        state
            .chat
            .create_message(session.id, ChatRole::User, "first", MessageStatus::Completed);
        state.chat.create_message(
            session.id,
            ChatRole::Assistant,
            "earlier answer",
            MessageStatus::Completed,
        );
        // An interrupted row with no content must not reach the prompt.
        state
            .chat
            .create_message(session.id, ChatRole::Assistant, "", MessageStatus::Interrupted);
        state
            .chat
            .create_message(session.id, ChatRole::User, "second", MessageStatus::Completed);
        let assistant = state.chat.create_message(
            session.id,
            ChatRole::Assistant,
            "",
            MessageStatus::Pending,
        );

        let mut input = turn_input(session.id, assistant.id);
        input.user_message = "second".into();
        run_turn(&state, &input, CancelToken::new()).await.unwrap();

        let request = &provider.requests()[0];
        let texts: Vec<String> = request
            .messages
            .iter()
            .map(|m| m.content.extract_all_text())
            .collect();
        assert!(texts.contains(&"earlier answer".to_string()));
        assert_eq!(texts.iter().filter(|t| t.is_empty()).count(), 0);
    }

    #[tokio::test]
    async fn missing_row_is_a_retryable_error() {
        let provider = MockProvider::new(vec![]);
        let (_dir, state) = test_state(provider);
        let input = turn_input(1, 999);
        assert!(run_turn(&state, &input, CancelToken::new()).await.is_err());
    }
}
