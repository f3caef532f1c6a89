//! Graph execution engine — the bounded agent/tools loop.
//!
//! Two nodes and one conditional edge: the agent node streams an LLM call
//! with the main-agent tool set bound; if the response carries tool calls
//! the tools node dispatches them (the synthetic `delegate_to_specialist`
//! bridges into the consultation scheduler) and control returns to the
//! agent node. The loop is bounded by an explicit step counter: entering
//! the agent node at the cap produces the overflow message without
//! another LLM call, so a turn makes at most `max_iterations` LLM
//! invocations on this path.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;

use ca_domain::error::{Error, Result};
use ca_domain::stream::StreamEvent;
use ca_domain::tool::{Message, ToolCall, ToolDefinition, ToolScope};
use ca_providers::{ChatRequest, LlmProvider};
use ca_tools::{ToolExecutor, ToolRegistry};

use crate::runtime::cancel::CancelToken;
use crate::runtime::events::AgentEvent;
use crate::runtime::specialists::{
    consult_specialists, ConsultContext, SpecialistCatalogue,
};

/// The synthetic delegation tool, injected into the agent's tool set and
/// never present in the registry.
pub const DELEGATE_TOOL: &str = "delegate_to_specialist";

const OVERFLOW_MESSAGE: &str =
    "Sorry, I exceeded the maximum number of tool executions. Please try rephrasing \
     your question.";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct PatientProfile {
    pub id: i64,
    pub name: String,
}

/// The value threaded through the graph. `messages` only ever grows.
#[derive(Debug, Clone, Default)]
pub struct TurnState {
    pub messages: Vec<Message>,
    pub patient_profile: Option<PatientProfile>,
    pub steps_taken: u32,
    pub next_agents: Vec<String>,
    pub final_report: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Graph context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything the loop needs, built once per turn.
#[derive(Clone)]
pub struct GraphContext {
    pub provider: Arc<dyn LlmProvider>,
    pub registry: Arc<ToolRegistry>,
    pub executor: ToolExecutor,
    pub catalogue: SpecialistCatalogue,
    pub system_prompt: String,
    pub temperature: f32,
    pub max_iterations: u32,
    pub max_concurrent_specialists: usize,
    pub specialist_timeout: Duration,
}

impl GraphContext {
    fn consult_context(&self, events: mpsc::Sender<AgentEvent>) -> ConsultContext {
        ConsultContext {
            provider: self.provider.clone(),
            registry: self.registry.clone(),
            executor: self.executor.clone(),
            temperature: self.temperature,
            max_concurrent: self.max_concurrent_specialists,
            timeout: self.specialist_timeout,
            events,
        }
    }

    /// The main agent's effective tool set: every global-scope tool plus
    /// the delegation tool.
    fn agent_tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .registry
            .list_for_scope(Some(ToolScope::Global))
            .into_iter()
            .map(|t| t.definition)
            .collect();
        defs.push(delegation_definition(&self.catalogue));
        defs
    }
}

fn delegation_definition(catalogue: &SpecialistCatalogue) -> ToolDefinition {
    ToolDefinition {
        name: DELEGATE_TOOL.into(),
        description: format!(
            "Delegate a specific medical query to a specialist. The specialist \
             executes independently and returns a final report. Available \
             specialists: {}",
            catalogue.summary()
        ),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "specialist_name": {
                    "type": "string",
                    "description": "The name or role of the specialist"
                },
                "query": {
                    "type": "string",
                    "description": "The specific query or task for the specialist"
                }
            },
            "required": ["specialist_name", "query"]
        }),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Drive one turn through the agent/tools loop, emitting [`AgentEvent`]s
/// as they happen. Returns the final state; `Error::Cancelled` when the
/// token fires at a check point.
pub async fn run_graph(
    ctx: GraphContext,
    mut state: TurnState,
    tx: mpsc::Sender<AgentEvent>,
    cancel: CancelToken,
) -> Result<TurnState> {
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled("turn cancelled".into()));
        }

        // Iteration bound: the overflow message costs no LLM call.
        if state.steps_taken >= ctx.max_iterations {
            tracing::warn!(
                max_iterations = ctx.max_iterations,
                "iteration cap reached, forcing termination"
            );
            let _ = tx
                .send(AgentEvent::Content {
                    text: OVERFLOW_MESSAGE.into(),
                })
                .await;
            state.messages.push(Message::assistant(OVERFLOW_MESSAGE));
            state.final_report = Some(OVERFLOW_MESSAGE.into());
            return Ok(state);
        }
        state.steps_taken += 1;

        // ── Agent node: one streamed LLM call ──────────────────────
        let mut call_messages = Vec::with_capacity(state.messages.len() + 1);
        call_messages.push(Message::system(&ctx.system_prompt));
        call_messages.extend(state.messages.iter().cloned());

        let request = ChatRequest {
            messages: call_messages,
            tools: ctx.agent_tool_definitions(),
            temperature: Some(ctx.temperature),
            max_tokens: None,
            model: None,
        };

        tracing::debug!(step = state.steps_taken, "agent node LLM call");
        let mut stream = tokio::select! {
            stream = ctx.provider.chat_stream(request) => stream?,
            () = cancel.cancelled() => {
                return Err(Error::Cancelled("turn cancelled during LLM call".into()));
            }
        };

        let mut text_buf = String::new();
        let mut pending: Vec<ToolCall> = Vec::new();
        // call_id -> (name, argument fragments); insertion-ordered so
        // providers that never emit ToolCallFinished still dispatch in
        // call order.
        let mut assembling: Vec<(String, String, String)> = Vec::new();

        loop {
            let event = tokio::select! {
                event = stream.next() => match event {
                    Some(event) => event,
                    None => break,
                },
                () = cancel.cancelled() => {
                    return Err(Error::Cancelled("turn cancelled during streaming".into()));
                }
            };
            match event? {
                StreamEvent::Token { text } => {
                    let _ = tx.send(AgentEvent::Content { text: text.clone() }).await;
                    text_buf.push_str(&text);
                }
                StreamEvent::Thinking { text } => {
                    let _ = tx.send(AgentEvent::Reasoning { text }).await;
                }
                StreamEvent::ToolCallStarted { call_id, tool_name } => {
                    assembling.push((call_id, tool_name, String::new()));
                }
                StreamEvent::ToolCallDelta { call_id, delta } => {
                    if let Some(entry) =
                        assembling.iter_mut().find(|(id, _, _)| *id == call_id)
                    {
                        entry.2.push_str(&delta);
                    }
                }
                StreamEvent::ToolCallFinished {
                    call_id,
                    tool_name,
                    arguments,
                } => {
                    assembling.retain(|(id, _, _)| *id != call_id);
                    pending.push(ToolCall {
                        call_id,
                        tool_name,
                        arguments,
                    });
                }
                StreamEvent::Done { usage, .. } => {
                    if let Some(usage) = usage {
                        let _ = tx.send(AgentEvent::Usage(usage)).await;
                    }
                }
                StreamEvent::Error { message } => {
                    return Err(Error::Provider {
                        provider: ctx.provider.provider_id().into(),
                        message,
                    });
                }
            }
        }

        // Providers that only emit start/delta leave assembly buffers.
        for (call_id, tool_name, args_buf) in assembling.drain(..) {
            pending.push(ToolCall {
                call_id,
                tool_name,
                arguments: parse_arguments(&args_buf),
            });
        }

        // ── Conditional edge ───────────────────────────────────────
        if pending.is_empty() {
            state.final_report = Some(text_buf.clone());
            state.messages.push(Message::assistant(text_buf));
            return Ok(state);
        }

        // ── Tools node ─────────────────────────────────────────────
        state
            .messages
            .push(Message::assistant_with_tool_calls(&text_buf, &pending));

        let visible = ctx.registry.main_agent_symbols();
        for tc in &pending {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled("turn cancelled during tool dispatch".into()));
            }

            let _ = tx
                .send(AgentEvent::ToolCall {
                    id: tc.call_id.clone(),
                    name: tc.tool_name.clone(),
                    args: tc.arguments.clone(),
                })
                .await;

            let result_text = if tc.tool_name == DELEGATE_TOOL {
                run_delegation(&ctx, &tx, &tc.arguments).await
            } else {
                ctx.executor
                    .execute_scoped(&tc.tool_name, &tc.arguments, &visible)
                    .await
                    .to_text()
            };

            let _ = tx
                .send(AgentEvent::ToolResult {
                    id: tc.call_id.clone(),
                    result: result_text.clone(),
                })
                .await;

            state
                .messages
                .push(Message::tool_result(&tc.call_id, &result_text));
        }
        // Unconditionally back to the agent node.
    }
}

/// Resolve and run a delegation call, returning the tool-result text.
async fn run_delegation(
    ctx: &GraphContext,
    tx: &mpsc::Sender<AgentEvent>,
    args: &Value,
) -> String {
    let Some(name) = args.get("specialist_name").and_then(Value::as_str) else {
        return "Error: missing required argument: specialist_name".into();
    };
    let query = args.get("query").and_then(Value::as_str).unwrap_or("");

    let Some(profile) = ctx.catalogue.resolve(name) else {
        return format!(
            "Specialist '{name}' not found. Available specialists: {}",
            ctx.catalogue.summary()
        );
    };
    let role = profile.role.clone();
    tracing::info!(specialist = %role, "delegating to specialist");

    let consult_ctx = ctx.consult_context(tx.clone());
    let reports = consult_specialists(&consult_ctx, &ctx.catalogue, &[role], query).await;

    if reports.is_empty() {
        return "Specialist did not return a response.".into();
    }
    reports
        .iter()
        .map(|m| m.content.extract_all_text())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(raw).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "tool call arguments are not valid JSON; defaulting to empty object");
        Value::Object(Default::default())
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
