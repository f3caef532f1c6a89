//! Specialist catalogue and consultation scheduler.
//!
//! The catalogue is rebuilt at the start of every turn: hard-coded core
//! specialists seeded first, enabled persisted specialists merged in (core
//! wins on role collision). Consultations fan out under a semaphore and a
//! single batch deadline; each worker runs one-step ReAct (one LLM call,
//! optional sequential tool batch, one follow-up call).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Semaphore};

use ca_domain::tool::{Message, ToolDefinition, ToolScope};
use ca_providers::{ChatRequest, LlmProvider};
use ca_storage::SpecialistStore;
use ca_tools::{ToolExecutor, ToolRegistry};

use crate::runtime::events::{AgentEvent, LogEntry};
use crate::runtime::prompt;

/// Specialist id used for core (code-defined) specialists, which have no
/// storage row.
pub const CORE_SPECIALIST_ID: i64 = 0;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Catalogue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct SpecialistProfile {
    pub id: i64,
    pub role: String,
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    pub tool_symbols: Vec<String>,
}

/// Ordered role → profile mapping for one turn.
#[derive(Debug, Clone, Default)]
pub struct SpecialistCatalogue {
    entries: Vec<SpecialistProfile>,
}

/// The core internist, defined in code rather than storage.
fn core_internist() -> SpecialistProfile {
    SpecialistProfile {
        id: CORE_SPECIALIST_ID,
        role: "clinical_text".into(),
        name: "Internist".into(),
        description: "Analyzes clinical notes, patient history, symptoms, and medical \
                      records to provide comprehensive clinical assessment."
            .into(),
        system_prompt: prompt::internist_system_prompt(),
        tool_symbols: vec!["query_patient_info".into()],
    }
}

impl SpecialistCatalogue {
    /// Build the catalogue for a turn: core specialists first, then every
    /// enabled persisted specialist whose role does not collide.
    pub fn load(store: &SpecialistStore) -> Self {
        let mut entries = vec![core_internist()];
        let mut roles: HashSet<String> = entries.iter().map(|e| e.role.clone()).collect();

        for record in store.list_enabled() {
            if !roles.insert(record.role.clone()) {
                tracing::debug!(role = %record.role, "persisted specialist shadowed by core");
                continue;
            }
            entries.push(SpecialistProfile {
                id: record.id,
                role: record.role,
                name: record.name,
                description: record.description,
                system_prompt: record.system_prompt,
                tool_symbols: record.tool_symbols,
            });
        }

        tracing::debug!(specialists = entries.len(), "specialist catalogue loaded");
        Self { entries }
    }

    #[cfg(test)]
    pub fn from_profiles(entries: Vec<SpecialistProfile>) -> Self {
        Self { entries }
    }

    pub fn get(&self, role: &str) -> Option<&SpecialistProfile> {
        self.entries.iter().find(|e| e.role == role)
    }

    /// Resolve by role id first, then by case-insensitive display name.
    pub fn resolve(&self, name_or_role: &str) -> Option<&SpecialistProfile> {
        if let Some(profile) = self.get(name_or_role) {
            return Some(profile);
        }
        let needle = name_or_role.to_lowercase();
        self.entries.iter().find(|e| e.name.to_lowercase() == needle)
    }

    /// `"Internist (clinical_text), Cardiologist (cardiology)"` — used in
    /// the delegation tool description and not-found errors.
    pub fn summary(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("{} ({})", e.name, e.role))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn profiles(&self) -> &[SpecialistProfile] {
        &self.entries
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Consultation scheduler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything a consultation batch needs besides the roles and query.
#[derive(Clone)]
pub struct ConsultContext {
    pub provider: Arc<dyn LlmProvider>,
    pub registry: Arc<ToolRegistry>,
    pub executor: ToolExecutor,
    pub temperature: f32,
    pub max_concurrent: usize,
    pub timeout: Duration,
    pub events: mpsc::Sender<AgentEvent>,
}

fn report(name: &str, content: &str) -> Message {
    Message::system(format!("REPORT FROM SPECIALIST **[{name}]**:\n{content}"))
}

fn error_report(name: &str, detail: &str) -> Message {
    Message::system(format!(
        "REPORT FROM SPECIALIST **[{name}]**: Error during consultation - {detail}"
    ))
}

/// Fan-out / fan-in consultation of `roles` with `query`.
///
/// Results come back in input role order. Unknown roles and worker
/// failures yield error-shaped reports without aborting the batch; when
/// the batch deadline fires, every still-running worker is aborted and a
/// single synthetic timeout report replaces the batch.
pub async fn consult_specialists(
    ctx: &ConsultContext,
    catalogue: &SpecialistCatalogue,
    roles: &[String],
    query: &str,
) -> Vec<Message> {
    if roles.is_empty() {
        return Vec::new();
    }

    let semaphore = Arc::new(Semaphore::new(ctx.max_concurrent));
    let mut handles = Vec::new();

    for role in roles {
        let profile = catalogue.get(role).cloned();
        let role = role.clone();
        let query = query.to_string();
        let ctx = ctx.clone();
        let semaphore = semaphore.clone();

        handles.push(tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return error_report(&role, "scheduler shut down");
            };

            let Some(profile) = profile else {
                let _ = ctx
                    .events
                    .send(AgentEvent::Log(LogEntry::error(format!(
                        "Specialist {role} not found"
                    ))))
                    .await;
                return Message::system(format!(
                    "REPORT FROM SPECIALIST **[{role}]**: Specialist not available"
                ));
            };

            match consult_one(&ctx, &profile, &query).await {
                Ok(content) => report(&profile.name, &content),
                Err(e) => error_report(&profile.name, &e.to_string()),
            }
        }));
    }

    let abort_handles: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
    let joined =
        tokio::time::timeout(ctx.timeout, futures_util::future::join_all(handles)).await;

    let results = match joined {
        Ok(results) => results,
        Err(_) => {
            for handle in abort_handles {
                handle.abort();
            }
            tracing::warn!(
                timeout_sec = ctx.timeout.as_secs(),
                "specialist batch deadline exceeded"
            );
            return vec![Message::system(format!(
                "REPORT FROM SPECIALIST **[Timeout]**: consultation exceeded the {}s deadline",
                ctx.timeout.as_secs()
            ))];
        }
    };

    results
        .into_iter()
        .zip(roles)
        .map(|(result, role)| match result {
            Ok(message) => message,
            Err(e) => error_report(role, &format!("worker panicked: {e}")),
        })
        .collect()
}

/// One-step ReAct for a single specialist: one LLM call, an optional
/// sequential tool batch, and one follow-up call. No further rounds.
async fn consult_one(
    ctx: &ConsultContext,
    profile: &SpecialistProfile,
    query: &str,
) -> ca_domain::error::Result<String> {
    let started = Instant::now();
    let _ = ctx
        .events
        .send(AgentEvent::Log(LogEntry::info(format!(
            "Consulting {}...",
            profile.name
        ))))
        .await;

    // Specialist tool set: assigned ∪ global, deduplicated by symbol.
    let mut tools = ctx
        .registry
        .list_for_specialist(profile.id, &profile.tool_symbols);
    let mut symbols: HashSet<String> =
        tools.iter().map(|t| t.definition.name.clone()).collect();
    for tool in ctx.registry.list_for_scope(Some(ToolScope::Global)) {
        if symbols.insert(tool.definition.name.clone()) {
            tools.push(tool);
        }
    }
    let definitions: Vec<ToolDefinition> = tools.iter().map(|t| t.definition.clone()).collect();

    let mut messages = vec![
        Message::system(&profile.system_prompt),
        Message::user(query),
    ];

    let first = ctx
        .provider
        .chat(ChatRequest {
            messages: messages.clone(),
            tools: definitions.clone(),
            temperature: Some(ctx.temperature),
            max_tokens: None,
            model: None,
        })
        .await?;

    let mut content = first.content.clone();

    if !first.tool_calls.is_empty() {
        messages.push(Message::assistant_with_tool_calls(
            &first.content,
            &first.tool_calls,
        ));

        for tc in &first.tool_calls {
            let tool_started = Instant::now();
            let _ = ctx
                .events
                .send(AgentEvent::Log(LogEntry::info(format!(
                    "Running {}",
                    tc.tool_name
                ))))
                .await;

            let outcome = ctx
                .executor
                .execute_scoped(&tc.tool_name, &tc.arguments, &symbols)
                .await;

            let _ = ctx
                .events
                .send(AgentEvent::Log(
                    LogEntry::info(format!("Finished {}", tc.tool_name))
                        .with_duration(tool_started.elapsed().as_secs_f64()),
                ))
                .await;

            messages.push(Message::tool_result(&tc.call_id, outcome.to_text()));
        }

        let second = ctx
            .provider
            .chat(ChatRequest {
                messages,
                tools: definitions,
                temperature: Some(ctx.temperature),
                max_tokens: None,
                model: None,
            })
            .await?;
        content = second.content;
    }

    let _ = ctx
        .events
        .send(AgentEvent::Log(
            LogEntry::info(format!("Finished {}", profile.name))
                .with_duration(started.elapsed().as_secs_f64()),
        ))
        .await;

    Ok(content)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
