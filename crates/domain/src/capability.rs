use serde::{Deserialize, Serialize};

/// Advertised capabilities of a {provider, model} pair.
///
/// The turn runtime uses `supports_streaming` to decide between the
/// streaming and degraded (single-chunk) paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCapabilities {
    pub supports_tools: bool,
    pub supports_streaming: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_window_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

impl Default for LlmCapabilities {
    fn default() -> Self {
        Self {
            supports_tools: false,
            supports_streaming: false,
            context_window_tokens: None,
            max_output_tokens: None,
        }
    }
}
