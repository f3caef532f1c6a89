use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent orchestration limits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Knobs for the main-agent loop and specialist fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Override for the built-in main system prompt.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Maximum agent→tools→agent iterations per turn.
    #[serde(default = "d_10")]
    pub max_iterations: u32,
    /// Semaphore capacity for concurrent specialist consultations.
    #[serde(default = "d_5")]
    pub max_concurrent_specialists: usize,
    /// Wall-clock deadline for a whole specialist batch (seconds).
    #[serde(default = "d_30")]
    pub specialist_timeout_sec: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            max_iterations: 10,
            max_concurrent_specialists: 5,
            specialist_timeout_sec: 30,
        }
    }
}

fn d_10() -> u32 {
    10
}
fn d_5() -> usize {
    5
}
fn d_30() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_orchestration_limits() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.max_iterations, 10);
        assert_eq!(cfg.max_concurrent_specialists, 5);
        assert_eq!(cfg.specialist_timeout_sec, 30);
        assert!(cfg.system_prompt.is_none());
    }

    #[test]
    fn deserialize_missing_fields_uses_defaults() {
        let cfg: AgentConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.max_iterations, 10);
    }

    #[test]
    fn partial_override() {
        let cfg: AgentConfig = toml::from_str("max_iterations = 3").unwrap();
        assert_eq!(cfg.max_iterations, 3);
        assert_eq!(cfg.max_concurrent_specialists, 5);
    }
}
