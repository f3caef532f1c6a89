//! Process-wide tool registry.
//!
//! The registry is the only shared mutable singleton in the system: writes
//! happen at startup (builtin registration) and during per-turn reconciles
//! against persisted records, reads on every tool binding and dispatch.
//! The `RwLock` keeps a reload from tearing a concurrent lookup.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use ca_domain::error::{Error, Result};
use ca_domain::tool::{ToolDefinition, ToolScope};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A callable tool body. Implementations receive the keyword-argument map
/// and return the string the LLM will see as the tool result.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: &Value) -> Result<String>;
}

/// Adapter for synchronous native functions.
pub struct NativeTool {
    func: Box<dyn Fn(&Value) -> Result<String> + Send + Sync>,
}

impl NativeTool {
    pub fn new<F>(func: F) -> Arc<Self>
    where
        F: Fn(&Value) -> Result<String> + Send + Sync + 'static,
    {
        Arc::new(Self {
            func: Box::new(func),
        })
    }
}

#[async_trait::async_trait]
impl ToolHandler for NativeTool {
    async fn call(&self, args: &Value) -> Result<String> {
        (self.func)(args)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registered tool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A tool as held by the registry: definition, scope tags, enabled bit,
/// and the callable body.
#[derive(Clone)]
pub struct RegisteredTool {
    pub definition: ToolDefinition,
    pub scope: ToolScope,
    pub assigned_specialist_id: Option<i64>,
    pub enabled: bool,
    pub handler: Arc<dyn ToolHandler>,
}

impl RegisteredTool {
    pub fn symbol(&self) -> &str {
        &self.definition.name
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, RegisteredTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its definition name. Fails with
    /// `AlreadyRegistered` unless `allow_overwrite` is set.
    pub fn register(&self, tool: RegisteredTool, allow_overwrite: bool) -> Result<()> {
        let symbol = tool.symbol().to_string();
        let mut tools = self.tools.write();
        if tools.contains_key(&symbol) && !allow_overwrite {
            return Err(Error::AlreadyRegistered(symbol));
        }
        tools.insert(symbol, tool);
        Ok(())
    }

    /// Look up an enabled tool by symbol.
    pub fn get(&self, symbol: &str) -> Option<RegisteredTool> {
        self.tools
            .read()
            .get(symbol)
            .filter(|t| t.enabled)
            .cloned()
    }

    /// Whether a symbol is registered at all (enabled or not).
    pub fn contains(&self, symbol: &str) -> bool {
        self.tools.read().contains_key(symbol)
    }

    /// Flip the enabled bit. Returns false for unknown symbols.
    pub fn set_enabled(&self, symbol: &str, enabled: bool) -> bool {
        let mut tools = self.tools.write();
        match tools.get_mut(symbol) {
            Some(tool) => {
                tool.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn enable(&self, symbol: &str) -> bool {
        self.set_enabled(symbol, true)
    }

    pub fn disable(&self, symbol: &str) -> bool {
        self.set_enabled(symbol, false)
    }

    /// Enabled tools visible under the given scope filter, sorted by
    /// symbol for deterministic binding order. `None` returns all enabled.
    pub fn list_for_scope(&self, filter: Option<ToolScope>) -> Vec<RegisteredTool> {
        let tools = self.tools.read();
        let mut out: Vec<_> = tools
            .values()
            .filter(|t| t.enabled && t.scope.visible_under(filter))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.definition.name.cmp(&b.definition.name));
        out
    }

    /// Enabled tools assigned to a specialist, plus any enabled tool whose
    /// symbol appears in the specialist's declared `tool_symbols`.
    pub fn list_for_specialist(
        &self,
        specialist_id: i64,
        declared_symbols: &[String],
    ) -> Vec<RegisteredTool> {
        let declared: HashSet<&str> = declared_symbols.iter().map(String::as_str).collect();
        let tools = self.tools.read();
        let mut out: Vec<_> = tools
            .values()
            .filter(|t| {
                t.enabled
                    && (t.assigned_specialist_id == Some(specialist_id)
                        || declared.contains(t.definition.name.as_str()))
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| a.definition.name.cmp(&b.definition.name));
        out
    }

    /// The symbols visible to the main agent (`global` ∪ `both`).
    pub fn main_agent_symbols(&self) -> HashSet<String> {
        self.list_for_scope(Some(ToolScope::Global))
            .into_iter()
            .map(|t| t.definition.name)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(symbol: &str, scope: ToolScope, assigned: Option<i64>) -> RegisteredTool {
        RegisteredTool {
            definition: ToolDefinition {
                name: symbol.into(),
                description: format!("test tool {symbol}"),
                parameters: serde_json::json!({"type": "object", "properties": {}}),
            },
            scope,
            assigned_specialist_id: assigned,
            enabled: true,
            handler: NativeTool::new(|_| Ok("ok".into())),
        }
    }

    #[test]
    fn register_and_get() {
        let registry = ToolRegistry::new();
        registry
            .register(tool("get_current_datetime", ToolScope::Global, None), false)
            .unwrap();
        assert!(registry.get("get_current_datetime").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn duplicate_registration_fails_without_overwrite() {
        let registry = ToolRegistry::new();
        registry
            .register(tool("get_weather", ToolScope::Global, None), false)
            .unwrap();
        let err = registry
            .register(tool("get_weather", ToolScope::Global, None), false)
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyRegistered(s) if s == "get_weather"));

        // With allow_overwrite the second registration wins.
        registry
            .register(tool("get_weather", ToolScope::Both, None), true)
            .unwrap();
        assert_eq!(registry.get("get_weather").unwrap().scope, ToolScope::Both);
    }

    #[test]
    fn disabled_tools_are_invisible() {
        let registry = ToolRegistry::new();
        registry
            .register(tool("query_patient_info", ToolScope::Assignable, Some(0)), false)
            .unwrap();
        assert!(registry.disable("query_patient_info"));
        assert!(registry.get("query_patient_info").is_none());
        assert!(registry.list_for_scope(None).is_empty());
        assert!(registry.list_for_specialist(0, &[]).is_empty());

        assert!(registry.enable("query_patient_info"));
        assert!(registry.get("query_patient_info").is_some());
        assert!(!registry.enable("no_such_tool"));
    }

    #[test]
    fn scope_filter_includes_both() {
        let registry = ToolRegistry::new();
        registry.register(tool("a_global", ToolScope::Global, None), false).unwrap();
        registry.register(tool("b_both", ToolScope::Both, None), false).unwrap();
        registry
            .register(tool("c_assigned", ToolScope::Assignable, Some(3)), false)
            .unwrap();

        let global: Vec<_> = registry
            .list_for_scope(Some(ToolScope::Global))
            .iter()
            .map(|t| t.definition.name.clone())
            .collect();
        assert_eq!(global, vec!["a_global", "b_both"]);

        let all: Vec<_> = registry.list_for_scope(None);
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn specialist_listing_unions_assigned_and_declared() {
        let registry = ToolRegistry::new();
        registry
            .register(tool("assigned_tool", ToolScope::Assignable, Some(7)), false)
            .unwrap();
        registry
            .register(tool("declared_tool", ToolScope::Assignable, None), false)
            .unwrap();
        registry
            .register(tool("other_tool", ToolScope::Assignable, Some(9)), false)
            .unwrap();

        let symbols: Vec<_> = registry
            .list_for_specialist(7, &["declared_tool".into()])
            .iter()
            .map(|t| t.definition.name.clone())
            .collect();
        assert_eq!(symbols, vec!["assigned_tool", "declared_tool"]);
    }

    #[test]
    fn main_agent_symbols_exclude_assignable() {
        let registry = ToolRegistry::new();
        registry.register(tool("visible", ToolScope::Global, None), false).unwrap();
        registry
            .register(tool("secret_lookup", ToolScope::Assignable, Some(1)), false)
            .unwrap();
        let symbols = registry.main_agent_symbols();
        assert!(symbols.contains("visible"));
        assert!(!symbols.contains("secret_lookup"));
    }
}
