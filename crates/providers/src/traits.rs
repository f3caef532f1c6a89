use futures_util::StreamExt;

use ca_domain::capability::LlmCapabilities;
use ca_domain::error::Result;
use ca_domain::stream::{BoxStream, StreamEvent, Usage};
use ca_domain::tool::{Message, ToolCall, ToolDefinition};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// The conversation messages to send.
    pub messages: Vec<Message>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
    /// Sampling temperature. `None` lets the provider choose.
    pub temperature: Option<f32>,
    /// Maximum tokens in the response. `None` lets the provider choose.
    pub max_tokens: Option<u32>,
    /// Model identifier override. When `None`, the provider uses its default.
    pub model: Option<String>,
}

/// A provider-agnostic chat completion response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Textual content of the response.
    pub content: String,
    /// Tool calls emitted by the model.
    pub tool_calls: Vec<ToolCall>,
    /// Token usage information, when the provider reports it.
    pub usage: Option<Usage>,
    /// The model that actually produced the response.
    pub model: String,
    /// The reason the model stopped (e.g. "stop", "tool_calls").
    pub finish_reason: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait that every LLM adapter must implement.
///
/// Adapters that cannot stream keep the default `chat_stream`, which
/// degrades to a single synthetic token carrying the full response.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a chat completion request and wait for the full response.
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse>;

    /// Send a chat completion request and return a stream of events.
    async fn chat_stream(
        &self,
        req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let response = self.chat(req).await?;
        Ok(degraded_stream(response))
    }

    /// The advertised capabilities of this provider/model combination.
    fn capabilities(&self) -> &LlmCapabilities;

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;
}

/// Turn a full response into the streaming event shape: one token with the
/// whole content, finished tool calls, then `Done` with usage.
pub(crate) fn degraded_stream(
    response: ChatResponse,
) -> BoxStream<'static, Result<StreamEvent>> {
    let mut events = Vec::new();
    if !response.content.is_empty() {
        events.push(Ok(StreamEvent::Token {
            text: response.content,
        }));
    }
    for tc in response.tool_calls {
        events.push(Ok(StreamEvent::ToolCallFinished {
            call_id: tc.call_id,
            tool_name: tc.tool_name,
            arguments: tc.arguments,
        }));
    }
    events.push(Ok(StreamEvent::Done {
        usage: response.usage,
        finish_reason: response.finish_reason,
    }));
    futures_util::stream::iter(events).boxed()
}
