//! Persisted tool records.
//!
//! The tool registry reconciles against these at turn start: `http` records
//! become HTTP-backed callables, `function` records resolve to
//! statically-linked native handlers by symbol.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use ca_domain::error::{Error, Result};
use ca_domain::tool::ToolScope;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    Function,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRecord {
    /// Stable snake_case symbol, unique process-wide.
    pub symbol: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub kind: ToolKind,
    #[serde(default = "d_scope")]
    pub scope: ToolScope,
    #[serde(default)]
    pub assigned_specialist_id: Option<i64>,
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// POST target for `http` tools.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// JSON Schema for the tool's parameters.
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
}

fn d_scope() -> ToolScope {
    ToolScope::Global
}
fn d_true() -> bool {
    true
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ToolRecordState {
    tools: HashMap<String, ToolRecord>,
}

/// Tool record store backed by `tools.json` under the state path.
pub struct ToolRecordStore {
    #[allow(dead_code)]
    path: PathBuf,
    state: RwLock<ToolRecordState>,
}

impl ToolRecordStore {
    pub fn new(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;
        let path = state_path.join("tools.json");
        let state = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            ToolRecordState::default()
        };

        tracing::info!(tools = state.tools.len(), "tool record store loaded");

        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    /// Enabled records ordered by symbol.
    pub fn list_enabled(&self) -> Vec<ToolRecord> {
        let state = self.state.read();
        let mut records: Vec<_> = state.tools.values().filter(|t| t.enabled).cloned().collect();
        records.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        records
    }

    /// Test/seed helper.
    pub fn insert(&self, record: ToolRecord) {
        self.state.write().tools.insert(record.symbol.clone(), record);
    }
}
