//! OpenAI-compatible adapter.
//!
//! Works with Moonshot/Kimi, OpenAI, vLLM, Ollama, and any other endpoint
//! following the OpenAI chat completions contract. Streaming deltas are
//! reassembled into provider-agnostic events; `reasoning_content` deltas
//! (Kimi thinking models) surface as `Thinking` events.

use serde_json::Value;

use ca_domain::capability::LlmCapabilities;
use ca_domain::config::{LlmConfig, ProviderConfig};
use ca_domain::error::{Error, Result};
use ca_domain::stream::{BoxStream, StreamEvent, Usage};
use ca_domain::tool::{ContentPart, Message, MessageContent, Role, ToolCall, ToolDefinition};

use crate::sse::event_stream;
use crate::traits::{ChatRequest, ChatResponse, LlmProvider};
use crate::util::from_reqwest;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: String,
    default_model: String,
    capabilities: LlmCapabilities,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a provider from its config entry. The API key is read once
    /// from the configured environment variable; a missing key is a
    /// configuration error for this provider.
    pub fn from_config(cfg: &ProviderConfig, llm: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&cfg.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                Error::Config(format!(
                    "provider '{}': environment variable {} is not set",
                    cfg.id, cfg.api_key_env
                ))
            })?;

        let default_model = cfg
            .default_model
            .clone()
            .unwrap_or_else(|| "kimi-k2-thinking".into());

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(llm.request_timeout_ms))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: cfg.id.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            default_model,
            capabilities: LlmCapabilities {
                supports_tools: true,
                supports_streaming: true,
                context_window_tokens: Some(128_000),
                max_output_tokens: Some(16_384),
            },
            client,
        })
    }

    fn effective_model(&self, req: &ChatRequest) -> String {
        req.model.clone().unwrap_or_else(|| self.default_model.clone())
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_chat_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_wire).collect();

        let mut body = serde_json::json!({
            "model": self.effective_model(req),
            "messages": messages,
            "stream": stream,
        });

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_wire).collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        if stream {
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn msg_to_wire(msg: &Message) -> Value {
    match msg.role {
        Role::Assistant => assistant_to_wire(msg),
        Role::Tool => tool_result_to_wire(msg),
        _ => serde_json::json!({
            "role": role_str(msg.role),
            "content": msg.content.extract_all_text(),
        }),
    }
}

fn assistant_to_wire(msg: &Message) -> Value {
    let mut obj = serde_json::json!({"role": "assistant"});
    let text = msg.content.extract_all_text();
    let tool_calls: Vec<Value> = msg
        .tool_calls()
        .iter()
        .map(|tc| {
            serde_json::json!({
                "id": tc.call_id,
                "type": "function",
                "function": {
                    "name": tc.tool_name,
                    "arguments": tc.arguments.to_string(),
                }
            })
        })
        .collect();

    obj["content"] = if text.is_empty() {
        Value::Null
    } else {
        Value::String(text)
    };
    if !tool_calls.is_empty() {
        obj["tool_calls"] = Value::Array(tool_calls);
    }
    obj
}

fn tool_result_to_wire(msg: &Message) -> Value {
    if let MessageContent::Parts(parts) = &msg.content {
        for part in parts {
            if let ContentPart::ToolResult {
                tool_use_id,
                content,
                ..
            } = part
            {
                return serde_json::json!({
                    "role": "tool",
                    "tool_call_id": tool_use_id,
                    "content": content,
                });
            }
        }
    }
    serde_json::json!({
        "role": "tool",
        "tool_call_id": "",
        "content": msg.content.extract_all_text(),
    })
}

fn tool_to_wire(def: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": def.name,
            "description": def.description,
            "parameters": def.parameters,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_usage(value: &Value) -> Option<Usage> {
    let usage = value.get("usage")?;
    if usage.is_null() {
        return None;
    }
    Some(Usage {
        prompt_tokens: usage.get("prompt_tokens")?.as_u64().unwrap_or(0) as u32,
        completion_tokens: usage.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0)
            as u32,
        total_tokens: usage.get("total_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
    })
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

fn parse_chat_response(body: &Value, requested_model: &str) -> Result<ChatResponse> {
    let choice = body
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| Error::Http("response has no choices".into()))?;
    let message = choice
        .get("message")
        .ok_or_else(|| Error::Http("choice has no message".into()))?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .enumerate()
                .map(|(i, call)| {
                    let function = call.get("function").cloned().unwrap_or_default();
                    ToolCall {
                        call_id: call
                            .get("id")
                            .and_then(Value::as_str)
                            .map(String::from)
                            .unwrap_or_else(|| format!("call_{i}")),
                        tool_name: function
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or("")
                            .to_string(),
                        arguments: parse_arguments(
                            function.get("arguments").and_then(Value::as_str).unwrap_or(""),
                        ),
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ChatResponse {
        content,
        tool_calls,
        usage: parse_usage(body),
        model: body
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(requested_model)
            .to_string(),
        finish_reason: choice
            .get("finish_reason")
            .and_then(Value::as_str)
            .map(String::from),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming parser state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Assembles OpenAI streaming deltas into stream events. Tool-call
/// arguments arrive as string fragments keyed by index; `ToolCallFinished`
/// events are flushed when the terminal `[DONE]` payload arrives.
#[derive(Default)]
struct StreamState {
    calls: Vec<PendingCall>,
    usage: Option<Usage>,
    finish_reason: Option<String>,
}

struct PendingCall {
    index: u64,
    call_id: String,
    tool_name: String,
    arguments_buf: String,
}

impl StreamState {
    fn handle(&mut self, payload: &str) -> Vec<Result<StreamEvent>> {
        if payload == "[DONE]" {
            return self.flush_done();
        }

        let chunk: Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unparseable stream payload");
                return Vec::new();
            }
        };

        let mut events = Vec::new();

        // The usage-only chunk has an empty choices array.
        if let Some(usage) = parse_usage(&chunk) {
            self.usage = Some(usage);
        }

        let Some(choice) = chunk.get("choices").and_then(|c| c.get(0)) else {
            return events;
        };

        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            self.finish_reason = Some(reason.to_string());
        }

        let Some(delta) = choice.get("delta") else {
            return events;
        };

        if let Some(text) = delta.get("reasoning_content").and_then(Value::as_str) {
            if !text.is_empty() {
                events.push(Ok(StreamEvent::Thinking { text: text.into() }));
            }
        }

        if let Some(text) = delta.get("content").and_then(Value::as_str) {
            if !text.is_empty() {
                events.push(Ok(StreamEvent::Token { text: text.into() }));
            }
        }

        if let Some(tool_deltas) = delta.get("tool_calls").and_then(Value::as_array) {
            for td in tool_deltas {
                events.extend(self.handle_tool_delta(td));
            }
        }

        events
    }

    fn handle_tool_delta(&mut self, td: &Value) -> Vec<Result<StreamEvent>> {
        let index = td.get("index").and_then(Value::as_u64).unwrap_or(0);
        let function = td.get("function");
        let mut events = Vec::new();

        if !self.calls.iter().any(|c| c.index == index) {
            let call_id = td
                .get("id")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| format!("call_{index}"));
            let tool_name = function
                .and_then(|f| f.get("name"))
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            events.push(Ok(StreamEvent::ToolCallStarted {
                call_id: call_id.clone(),
                tool_name: tool_name.clone(),
            }));
            self.calls.push(PendingCall {
                index,
                call_id,
                tool_name,
                arguments_buf: String::new(),
            });
        }

        if let Some(fragment) = function
            .and_then(|f| f.get("arguments"))
            .and_then(Value::as_str)
        {
            if !fragment.is_empty() {
                if let Some(call) = self.calls.iter_mut().find(|c| c.index == index) {
                    call.arguments_buf.push_str(fragment);
                    events.push(Ok(StreamEvent::ToolCallDelta {
                        call_id: call.call_id.clone(),
                        delta: fragment.to_string(),
                    }));
                }
            }
        }

        events
    }

    fn flush_done(&mut self) -> Vec<Result<StreamEvent>> {
        let mut events = Vec::new();
        for call in self.calls.drain(..) {
            events.push(Ok(StreamEvent::ToolCallFinished {
                call_id: call.call_id,
                tool_name: call.tool_name,
                arguments: parse_arguments(&call.arguments_buf),
            }));
        }
        events.push(Ok(StreamEvent::Done {
            usage: self.usage.take(),
            finish_reason: self.finish_reason.take(),
        }));
        events
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LlmProvider impl
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let model = self.effective_model(&req);
        let body = self.build_chat_body(&req, false);

        let response = self
            .client
            .post(self.chat_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = response.status();
        let body: Value = response.json().await.map_err(from_reqwest)?;

        if !status.is_success() {
            let message = body
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("request failed");
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("{status}: {message}"),
            });
        }

        parse_chat_response(&body, &model)
    }

    async fn chat_stream(
        &self,
        req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let body = self.build_chat_body(&req, true);

        let response = self
            .client
            .post(self.chat_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("{status}: {text}"),
            });
        }

        let mut state = StreamState::default();
        Ok(event_stream(response, move |payload| state.handle(payload)))
    }

    fn capabilities(&self) -> &LlmCapabilities {
        &self.capabilities
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    // ── Response parsing ───────────────────────────────────────────

    #[test]
    fn parse_content_only_response() {
        let body = serde_json::json!({
            "model": "kimi-k2-thinking",
            "choices": [{
                "message": {"role": "assistant", "content": "It is 9am in Tokyo."},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 8, "total_tokens": 20}
        });
        let resp = parse_chat_response(&body, "kimi-k2-thinking").unwrap();
        assert_eq!(resp.content, "It is 9am in Tokyo.");
        assert!(resp.tool_calls.is_empty());
        assert_eq!(resp.usage.unwrap().total_tokens, 20);
        assert_eq!(resp.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn parse_tool_call_response() {
        let body = serde_json::json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "tc_42",
                        "type": "function",
                        "function": {
                            "name": "get_current_datetime",
                            "arguments": "{\"timezone\":\"Asia/Tokyo\"}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let resp = parse_chat_response(&body, "m").unwrap();
        assert_eq!(resp.content, "");
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].call_id, "tc_42");
        assert_eq!(
            resp.tool_calls[0].arguments,
            serde_json::json!({"timezone": "Asia/Tokyo"})
        );
    }

    #[test]
    fn parse_invalid_arguments_default_to_empty_object() {
        assert_eq!(parse_arguments("not json"), serde_json::json!({}));
        assert_eq!(parse_arguments(""), serde_json::json!({}));
    }

    #[test]
    fn parse_missing_choices_is_an_error() {
        let body = serde_json::json!({"usage": {}});
        assert!(parse_chat_response(&body, "m").is_err());
    }

    // ── Streaming assembly ─────────────────────────────────────────

    fn collect(state: &mut StreamState, payloads: &[&str]) -> Vec<StreamEvent> {
        payloads
            .iter()
            .flat_map(|p| state.handle(p))
            .map(|e| e.unwrap())
            .collect()
    }

    #[test]
    fn stream_tokens_then_done() {
        let mut state = StreamState::default();
        let events = collect(
            &mut state,
            &[
                r#"{"choices":[{"delta":{"content":"Hel"}}]}"#,
                r#"{"choices":[{"delta":{"content":"lo"}}]}"#,
                r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
                r#"{"choices":[],"usage":{"prompt_tokens":5,"completion_tokens":2,"total_tokens":7}}"#,
                "[DONE]",
            ],
        );
        assert!(matches!(&events[0], StreamEvent::Token { text } if text == "Hel"));
        assert!(matches!(&events[1], StreamEvent::Token { text } if text == "lo"));
        match events.last().unwrap() {
            StreamEvent::Done { usage, finish_reason } => {
                assert_eq!(usage.as_ref().unwrap().total_tokens, 7);
                assert_eq!(finish_reason.as_deref(), Some("stop"));
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[test]
    fn stream_tool_call_assembly() {
        let mut state = StreamState::default();
        let events = collect(
            &mut state,
            &[
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"tc_1","function":{"name":"get_weather","arguments":""}}]}}]}"#,
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"location\":"}}]}}]}"#,
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"Tokyo\"}"}}]}}]}"#,
                r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
                "[DONE]",
            ],
        );

        assert!(matches!(
            &events[0],
            StreamEvent::ToolCallStarted { call_id, tool_name }
                if call_id == "tc_1" && tool_name == "get_weather"
        ));
        let finished = events
            .iter()
            .find_map(|e| match e {
                StreamEvent::ToolCallFinished {
                    call_id, arguments, ..
                } => Some((call_id.clone(), arguments.clone())),
                _ => None,
            })
            .expect("no ToolCallFinished event");
        assert_eq!(finished.0, "tc_1");
        assert_eq!(finished.1, serde_json::json!({"location": "Tokyo"}));
    }

    #[test]
    fn stream_reasoning_deltas_become_thinking() {
        let mut state = StreamState::default();
        let events = collect(
            &mut state,
            &[r#"{"choices":[{"delta":{"reasoning_content":"pondering"}}]}"#],
        );
        assert!(matches!(&events[0], StreamEvent::Thinking { text } if text == "pondering"));
    }

    #[test]
    fn stream_two_parallel_tool_calls() {
        let mut state = StreamState::default();
        let events = collect(
            &mut state,
            &[
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"a","function":{"name":"x","arguments":"{}"}},{"index":1,"id":"b","function":{"name":"y","arguments":"{}"}}]}}]}"#,
                "[DONE]",
            ],
        );
        let finished: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ToolCallFinished { call_id, .. } => Some(call_id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(finished, vec!["a", "b"]);
    }

    // ── Body building ──────────────────────────────────────────────

    #[test]
    fn wire_roundtrip_for_assistant_tool_message() {
        let calls = vec![ToolCall {
            call_id: "tc_1".into(),
            tool_name: "query_patient_info".into(),
            arguments: serde_json::json!({"query": "23"}),
        }];
        let wire = msg_to_wire(&Message::assistant_with_tool_calls("", &calls));
        assert_eq!(wire["role"], "assistant");
        assert!(wire["content"].is_null());
        assert_eq!(wire["tool_calls"][0]["id"], "tc_1");
        assert_eq!(wire["tool_calls"][0]["function"]["name"], "query_patient_info");
    }

    #[test]
    fn wire_tool_result_carries_call_id() {
        let wire = msg_to_wire(&Message::tool_result("tc_1", "sunny"));
        assert_eq!(wire["role"], "tool");
        assert_eq!(wire["tool_call_id"], "tc_1");
        assert_eq!(wire["content"], "sunny");
    }
}
