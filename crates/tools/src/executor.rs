//! Tool executor — safe invocation with the uniform outcome contract.
//!
//! Whatever happens inside a tool body, the caller gets a `ToolOutcome`;
//! errors become result text for the LLM, never panics or aborted turns.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use crate::registry::ToolRegistry;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Result of a tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub ok: bool,
    pub value: Option<String>,
    pub err: Option<String>,
}

impl ToolOutcome {
    pub fn success(value: impl Into<String>) -> Self {
        Self {
            ok: true,
            value: Some(value.into()),
            err: None,
        }
    }

    pub fn failure(err: impl Into<String>) -> Self {
        Self {
            ok: false,
            value: None,
            err: Some(err.into()),
        }
    }

    pub fn not_found(symbol: &str) -> Self {
        Self::failure(format!("Tool '{symbol}' not found"))
    }

    /// The string the LLM sees in the next tool-result message.
    pub fn to_text(&self) -> String {
        if self.ok {
            self.value.clone().unwrap_or_default()
        } else {
            format!("Error: {}", self.err.as_deref().unwrap_or("unknown"))
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Executor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// Invoke a tool by symbol. Absent or disabled symbols and handler
    /// errors are reported through the outcome, never propagated.
    pub async fn execute(&self, symbol: &str, args: &Value) -> ToolOutcome {
        let Some(tool) = self.registry.get(symbol) else {
            tracing::warn!(tool = symbol, "tool not found");
            return ToolOutcome::not_found(symbol);
        };

        tracing::debug!(tool = symbol, args = %args, "executing tool");
        match tool.handler.call(args).await {
            Ok(value) => ToolOutcome::success(value),
            Err(e) => {
                tracing::warn!(tool = symbol, error = %e, "tool execution failed");
                ToolOutcome::failure(e.to_string())
            }
        }
    }

    /// Invoke a tool only if its symbol is in the caller's visible set.
    /// An out-of-scope symbol yields the same not-found outcome as an
    /// unregistered one, so scope violations are indistinguishable from
    /// missing tools.
    pub async fn execute_scoped(
        &self,
        symbol: &str,
        args: &Value,
        visible: &HashSet<String>,
    ) -> ToolOutcome {
        if !visible.contains(symbol) {
            tracing::warn!(tool = symbol, "tool call out of scope");
            return ToolOutcome::not_found(symbol);
        }
        self.execute(symbol, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{NativeTool, RegisteredTool};
    use ca_domain::error::Error;
    use ca_domain::tool::{ToolDefinition, ToolScope};

    fn registry_with(symbol: &str, handler: Arc<NativeTool>) -> Arc<ToolRegistry> {
        let registry = Arc::new(ToolRegistry::new());
        registry
            .register(
                RegisteredTool {
                    definition: ToolDefinition {
                        name: symbol.into(),
                        description: "test".into(),
                        parameters: serde_json::json!({"type": "object"}),
                    },
                    scope: ToolScope::Global,
                    assigned_specialist_id: None,
                    enabled: true,
                    handler,
                },
                false,
            )
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn execute_success_returns_value() {
        let registry = registry_with("echo", NativeTool::new(|args| {
            Ok(args.get("text").and_then(|v| v.as_str()).unwrap_or("").to_string())
        }));
        let executor = ToolExecutor::new(registry);
        let outcome = executor
            .execute("echo", &serde_json::json!({"text": "hello"}))
            .await;
        assert!(outcome.ok);
        assert_eq!(outcome.to_text(), "hello");
    }

    #[tokio::test]
    async fn execute_unknown_tool_not_found() {
        let executor = ToolExecutor::new(Arc::new(ToolRegistry::new()));
        let outcome = executor.execute("ghost", &serde_json::json!({})).await;
        assert!(!outcome.ok);
        assert_eq!(outcome.to_text(), "Error: Tool 'ghost' not found");
    }

    #[tokio::test]
    async fn execute_handler_error_is_caught() {
        let registry = registry_with("boom", NativeTool::new(|_| {
            Err(Error::Other("deliberate failure".into()))
        }));
        let executor = ToolExecutor::new(registry);
        let outcome = executor.execute("boom", &serde_json::json!({})).await;
        assert!(!outcome.ok);
        assert_eq!(outcome.err.as_deref(), Some("deliberate failure"));
        assert_eq!(outcome.to_text(), "Error: deliberate failure");
    }

    #[tokio::test]
    async fn execute_disabled_tool_not_found() {
        let registry = registry_with("later", NativeTool::new(|_| Ok("x".into())));
        registry.disable("later");
        let executor = ToolExecutor::new(registry);
        let outcome = executor.execute("later", &serde_json::json!({})).await;
        assert!(!outcome.ok);
        assert_eq!(outcome.to_text(), "Error: Tool 'later' not found");
    }

    #[tokio::test]
    async fn scoped_execution_blocks_out_of_scope_symbols() {
        let registry = registry_with("secret_lookup", NativeTool::new(|_| Ok("classified".into())));
        let executor = ToolExecutor::new(registry);
        let visible = HashSet::new();
        let outcome = executor
            .execute_scoped("secret_lookup", &serde_json::json!({}), &visible)
            .await;
        assert!(!outcome.ok);
        assert!(outcome.to_text().starts_with("Error: Tool 'secret_lookup' not found"));

        let mut visible = HashSet::new();
        visible.insert("secret_lookup".to_string());
        let outcome = executor
            .execute_scoped("secret_lookup", &serde_json::json!({}), &visible)
            .await;
        assert!(outcome.ok);
    }
}
