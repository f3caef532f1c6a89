mod agent;
mod llm;
mod server;
mod storage;
mod tasks;
mod tools;

pub use agent::*;
pub use llm::*;
pub use server::*;
pub use storage::*;
pub use tasks::*;
pub use tools::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tasks: TaskConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration. Issues with `Error` severity must abort
    /// startup; warnings are logged and tolerated.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        let mut error = |field: &str, message: String| {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: field.into(),
                message,
            });
        };

        if self.agent.max_iterations == 0 {
            error("agent.max_iterations", "must be at least 1".into());
        }
        if self.agent.max_concurrent_specialists == 0 {
            error("agent.max_concurrent_specialists", "must be at least 1".into());
        }
        if self.agent.specialist_timeout_sec == 0 {
            error("agent.specialist_timeout_sec", "must be positive".into());
        }
        if self.tools.http_timeout_sec == 0 {
            error("tools.http_timeout_sec", "must be positive".into());
        }
        if self.tasks.max_attempts == 0 {
            error("tasks.max_attempts", "must be at least 1".into());
        }

        for (i, p) in self.llm.providers.iter().enumerate() {
            let field = format!("llm.providers[{i}]");
            if p.id.is_empty() {
                error(&field, "provider id must not be empty".into());
            }
            if p.base_url.is_empty() {
                error(&field, format!("provider '{}' has no base_url", p.id));
            }
        }

        if self.llm.providers.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "llm.providers".into(),
                message: "no LLM providers configured — turns will be rejected".into(),
            });
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_errors() {
        let cfg = Config::default();
        let errors: Vec<_> = cfg
            .validate()
            .into_iter()
            .filter(|i| i.severity == ConfigSeverity::Error)
            .collect();
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    }

    #[test]
    fn zero_iterations_is_an_error() {
        let mut cfg = Config::default();
        cfg.agent.max_iterations = 0;
        assert!(cfg
            .validate()
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.field == "agent.max_iterations"));
    }

    #[test]
    fn provider_without_base_url_is_an_error() {
        let mut cfg = Config::default();
        cfg.llm.providers.push(ProviderConfig {
            id: "kimi".into(),
            kind: ProviderKind::OpenaiCompat,
            base_url: String::new(),
            api_key_env: "KIMI_API_KEY".into(),
            default_model: Some("kimi-k2-thinking".into()),
        });
        assert!(cfg
            .validate()
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn empty_provider_list_is_a_warning() {
        let cfg = Config::default();
        assert!(cfg
            .validate()
            .iter()
            .any(|i| i.severity == ConfigSeverity::Warning && i.field == "llm.providers"));
    }

    #[test]
    fn issue_display_includes_severity_tag() {
        let issue = ConfigIssue {
            severity: ConfigSeverity::Error,
            field: "agent.max_iterations".into(),
            message: "must be at least 1".into(),
        };
        let rendered = issue.to_string();
        assert!(rendered.starts_with("[ERROR]"));
        assert!(rendered.contains("agent.max_iterations"));
    }
}
