use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM provider system
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Per-request timeout for non-streaming calls (milliseconds).
    #[serde(default = "d_120000")]
    pub request_timeout_ms: u64,
    /// Sampling temperature for agent calls.
    #[serde(default = "d_temperature")]
    pub temperature: f32,
    /// Registered LLM providers (data-driven: adding a provider = adding config).
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 120_000,
            temperature: 0.3,
            providers: Vec::new(),
        }
    }
}

/// A single provider entry under `[[llm.providers]]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique provider id, referenced by model specs (e.g. "kimi").
    pub id: String,
    #[serde(default)]
    pub kind: ProviderKind,
    /// Chat-completions base URL, without the trailing path.
    pub base_url: String,
    /// Environment variable holding the API key. Missing/empty at startup
    /// is a configuration error for this provider.
    #[serde(default = "d_api_key_env")]
    pub api_key_env: String,
    /// Default model when a request carries no override.
    #[serde(default)]
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Any endpoint following the OpenAI chat-completions contract
    /// (Moonshot/Kimi, OpenAI, vLLM, Ollama, ...).
    #[default]
    OpenaiCompat,
}

fn d_120000() -> u64 {
    120_000
}
fn d_api_key_env() -> String {
    "KIMI_API_KEY".into()
}
fn d_temperature() -> f32 {
    0.3
}
