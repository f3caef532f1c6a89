use std::sync::Arc;

use ca_providers::ProviderRegistry;
use ca_storage::{ChatStore, PatientStore, SpecialistStore, ToolRecordStore};
use ca_tools::{ToolExecutor, ToolRegistry};

use ca_domain::config::Config;

use crate::runtime::bus::EventBus;
use crate::runtime::cancel::CancelMap;
use crate::runtime::recall::RecallProvider;
use crate::runtime::tasks::{TaskRunner, TaskStore};

/// Shared application state passed to all API handlers and the runtime.
///
/// Fields are grouped by concern:
/// - **Core services** — config, LLM providers
/// - **Durable state** — chat, patients, specialists, tool records
/// - **Tool system** — the process-wide registry and executor
/// - **Runtime** — event bus, task store/runner, cancellation
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub llm: Arc<ProviderRegistry>,

    // ── Durable state ─────────────────────────────────────────────────
    pub chat: Arc<ChatStore>,
    pub patients: Arc<PatientStore>,
    pub specialists: Arc<SpecialistStore>,
    pub tool_records: Arc<ToolRecordStore>,

    // ── Tool system ───────────────────────────────────────────────────
    pub registry: Arc<ToolRegistry>,
    pub executor: ToolExecutor,

    // ── Memory (opaque recall hook) ───────────────────────────────────
    pub recall: Arc<dyn RecallProvider>,

    // ── Runtime ───────────────────────────────────────────────────────
    pub bus: Arc<EventBus>,
    pub tasks: Arc<TaskStore>,
    pub runner: Arc<TaskRunner>,
    pub cancel_map: Arc<CancelMap>,
}
