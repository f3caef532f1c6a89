//! Reconcile the registry against persisted tool records.
//!
//! Runs at the start of every turn. `http` records are wrapped in a POST
//! callable with a hard timeout; `function` records resolve to
//! statically-linked handlers by symbol. A bad record is logged and
//! skipped — the registry never crashes the turn for a bad tool.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use ca_domain::error::{Error, Result};
use ca_storage::{ToolKind, ToolRecord};

use crate::registry::{RegisteredTool, ToolHandler, ToolRegistry};
use ca_domain::tool::ToolDefinition;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP-backed tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A tool whose body is a POST of the keyword-argument map to a fixed
/// endpoint.
pub struct HttpTool {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpTool {
    pub fn new(endpoint: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { endpoint, client }
    }
}

#[async_trait::async_trait]
impl ToolHandler for HttpTool {
    async fn call(&self, args: &Value) -> Result<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(args)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("tool endpoint {}", self.endpoint))
                } else {
                    Error::Http(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::Http(format!("{status}: {body}")));
        }
        Ok(body)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reconcile
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn default_parameters() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {},
        "additionalProperties": true
    })
}

/// Register every loadable record that is not already present. Returns the
/// number of newly registered tools.
pub fn reconcile(
    registry: &ToolRegistry,
    records: &[ToolRecord],
    natives: &HashMap<String, Arc<dyn ToolHandler>>,
    http_timeout: Duration,
) -> usize {
    let mut loaded = 0;

    for record in records {
        if registry.contains(&record.symbol) {
            tracing::debug!(symbol = %record.symbol, "tool already registered, skipping");
            continue;
        }

        let handler: Arc<dyn ToolHandler> = match record.kind {
            ToolKind::Http => {
                let Some(endpoint) = record.endpoint.clone() else {
                    tracing::warn!(symbol = %record.symbol, "http tool record has no endpoint, skipping");
                    continue;
                };
                Arc::new(HttpTool::new(endpoint, http_timeout))
            }
            ToolKind::Function => match natives.get(&record.symbol) {
                Some(handler) => handler.clone(),
                None => {
                    tracing::warn!(
                        symbol = %record.symbol,
                        "function tool record has no native handler, skipping"
                    );
                    continue;
                }
            },
        };

        let tool = RegisteredTool {
            definition: ToolDefinition {
                name: record.symbol.clone(),
                description: record.description.clone(),
                parameters: record.parameters.clone().unwrap_or_else(default_parameters),
            },
            scope: record.scope,
            assigned_specialist_id: record.assigned_specialist_id,
            enabled: record.enabled,
            handler,
        };

        match registry.register(tool, false) {
            Ok(()) => {
                tracing::info!(symbol = %record.symbol, kind = ?record.kind, scope = ?record.scope, "loaded tool record");
                loaded += 1;
            }
            Err(e) => {
                // Raced with another reconcile; harmless.
                tracing::warn!(symbol = %record.symbol, error = %e, "tool registration skipped");
            }
        }
    }

    loaded
}
