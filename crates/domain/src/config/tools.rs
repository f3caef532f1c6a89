use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool execution configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Hard timeout for HTTP-backed tool invocations (seconds).
    #[serde(default = "d_90")]
    pub http_timeout_sec: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            http_timeout_sec: 90,
        }
    }
}

fn d_90() -> u64 {
    90
}
