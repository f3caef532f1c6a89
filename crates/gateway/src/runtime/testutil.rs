//! Scripted LLM provider for runtime tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use ca_domain::capability::LlmCapabilities;
use ca_domain::error::{Error, Result};
use ca_domain::stream::Usage;
use ca_domain::tool::ToolCall;
use ca_providers::{ChatRequest, ChatResponse, LlmProvider};

use crate::runtime::events::{AgentEvent, LogEntry};

/// One scripted completion. Replies are consumed in call order across the
/// whole provider (main agent and specialist workers share the script).
#[derive(Clone)]
pub struct ScriptedReply {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
    pub delay: Option<Duration>,
}

impl ScriptedReply {
    pub fn content(text: &str) -> Self {
        Self {
            content: text.into(),
            tool_calls: Vec::new(),
            usage: None,
            delay: None,
        }
    }

    pub fn tool_call(id: &str, name: &str, args: serde_json::Value) -> Self {
        Self {
            content: String::new(),
            tool_calls: vec![ToolCall {
                call_id: id.into(),
                tool_name: name.into(),
                arguments: args,
            }],
            usage: None,
            delay: None,
        }
    }

    pub fn with_usage(mut self, prompt: u32, completion: u32) -> Self {
        self.usage = Some(Usage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
        });
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

enum Behaviour {
    Scripted(Mutex<std::collections::VecDeque<ScriptedReply>>),
    Failing(String),
    Stalling(Duration),
    TrackConcurrency { delay: Duration },
}

pub struct MockProvider {
    behaviour: Behaviour,
    capabilities: LlmCapabilities,
    calls: AtomicUsize,
    requests: Mutex<Vec<ChatRequest>>,
    active: AtomicUsize,
    peak: Arc<AtomicUsize>,
}

impl MockProvider {
    fn build(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            capabilities: LlmCapabilities {
                supports_tools: true,
                supports_streaming: false,
                context_window_tokens: None,
                max_output_tokens: None,
            },
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn new(replies: Vec<ScriptedReply>) -> Arc<Self> {
        Self::build(Behaviour::Scripted(Mutex::new(replies.into())))
    }

    /// Always returns the same tool call — drives iteration-overflow tests.
    pub fn always_tool_calling(name: &str, args: serde_json::Value) -> Arc<Self> {
        let replies: Vec<_> = (0..64)
            .map(|i| ScriptedReply::tool_call(&format!("tc_{i}"), name, args.clone()))
            .collect();
        Self::new(replies)
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Self::build(Behaviour::Failing(message.into()))
    }

    pub fn stalling(delay: Duration) -> Arc<Self> {
        Self::build(Behaviour::Stalling(delay))
    }

    pub fn tracking_concurrency(delay: Duration) -> Arc<Self> {
        Self::build(Behaviour::TrackConcurrency { delay })
    }

    pub fn peak_concurrency(&self) -> Arc<AtomicUsize> {
        self.peak.clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait::async_trait]
impl LlmProvider for MockProvider {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(req);

        match &self.behaviour {
            Behaviour::Failing(message) => Err(Error::Provider {
                provider: "mock".into(),
                message: message.clone(),
            }),
            Behaviour::Stalling(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(plain("stalled"))
            }
            Behaviour::TrackConcurrency { delay } => {
                let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(*delay).await;
                self.active.fetch_sub(1, Ordering::SeqCst);
                Ok(plain("tracked"))
            }
            Behaviour::Scripted(replies) => {
                let reply = replies.lock().pop_front();
                let Some(reply) = reply else {
                    return Ok(plain(""));
                };
                if let Some(delay) = reply.delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(ChatResponse {
                    content: reply.content,
                    tool_calls: reply.tool_calls,
                    usage: reply.usage,
                    model: "mock-model".into(),
                    finish_reason: Some("stop".into()),
                })
            }
        }
    }

    fn capabilities(&self) -> &LlmCapabilities {
        &self.capabilities
    }

    fn provider_id(&self) -> &str {
        "mock"
    }
}

fn plain(text: &str) -> ChatResponse {
    ChatResponse {
        content: text.into(),
        tool_calls: Vec::new(),
        usage: None,
        model: "mock-model".into(),
        finish_reason: Some("stop".into()),
    }
}

/// A full `AppState` over temp-dir stores with the given provider wired
/// in. The returned `TempDir` must outlive the state.
pub fn test_state(provider: Arc<dyn LlmProvider>) -> (tempfile::TempDir, crate::state::AppState) {
    use std::time::Duration as StdDuration;

    use ca_domain::config::Config;
    use ca_providers::ProviderRegistry;
    use ca_storage::{ChatStore, PatientStore, SpecialistStore, ToolRecordStore};
    use ca_tools::{ToolExecutor, ToolRegistry};

    use crate::runtime::bus::EventBus;
    use crate::runtime::cancel::CancelMap;
    use crate::runtime::recall::NoopRecall;
    use crate::runtime::tasks::{TaskRunner, TaskStore};

    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(Config::default());

    let chat = Arc::new(ChatStore::new(dir.path()).unwrap());
    let patients = Arc::new(PatientStore::new(dir.path()).unwrap());
    let specialists = Arc::new(SpecialistStore::new(dir.path()).unwrap());
    let tool_records = Arc::new(ToolRecordStore::new(dir.path()).unwrap());

    let registry = Arc::new(ToolRegistry::new());
    ca_tools::builtin::register_builtins(
        &registry,
        patients.clone(),
        StdDuration::from_secs(config.tools.http_timeout_sec),
    )
    .unwrap();
    let executor = ToolExecutor::new(registry.clone());

    let state = crate::state::AppState {
        llm: Arc::new(ProviderRegistry::single("mock", provider)),
        chat,
        patients,
        specialists,
        tool_records,
        registry,
        executor,
        recall: Arc::new(NoopRecall),
        bus: Arc::new(EventBus::new()),
        tasks: Arc::new(TaskStore::new()),
        runner: Arc::new(TaskRunner::new(
            config.tasks.max_concurrent,
            config.tasks.max_attempts,
        )),
        cancel_map: Arc::new(CancelMap::new()),
        config,
    };

    (dir, state)
}

/// Drain buffered log events from an agent-event receiver.
pub fn drain_logs(mut rx: mpsc::Receiver<AgentEvent>) -> Vec<LogEntry> {
    let mut logs = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let AgentEvent::Log(entry) = event {
            logs.push(entry);
        }
    }
    logs
}

/// Drain every buffered agent event.
pub fn drain_events(mut rx: mpsc::Receiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
