//! Persisted specialist definitions.
//!
//! The catalogue merges these with the hard-coded core specialists at the
//! start of every turn (core wins on role collision).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use ca_domain::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialistRecord {
    pub id: i64,
    /// Stable role key, e.g. "cardiology".
    pub role: String,
    /// Human-facing name, e.g. "Cardiologist".
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub system_prompt: String,
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Tool symbols declared for this specialist, in addition to any
    /// registry tools assigned to it.
    #[serde(default)]
    pub tool_symbols: Vec<String>,
}

fn d_true() -> bool {
    true
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SpecialistState {
    specialists: HashMap<i64, SpecialistRecord>,
}

/// Specialist store backed by `specialists.json` under the state path.
pub struct SpecialistStore {
    #[allow(dead_code)]
    path: PathBuf,
    state: RwLock<SpecialistState>,
}

impl SpecialistStore {
    pub fn new(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;
        let path = state_path.join("specialists.json");
        let state = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            SpecialistState::default()
        };

        tracing::info!(
            specialists = state.specialists.len(),
            "specialist store loaded"
        );

        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    /// Enabled specialists ordered by id.
    pub fn list_enabled(&self) -> Vec<SpecialistRecord> {
        let state = self.state.read();
        let mut specialists: Vec<_> = state
            .specialists
            .values()
            .filter(|s| s.enabled)
            .cloned()
            .collect();
        specialists.sort_by_key(|s| s.id);
        specialists
    }

    /// Test/seed helper.
    pub fn insert(&self, record: SpecialistRecord) {
        self.state.write().specialists.insert(record.id, record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_enabled_skips_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let store = SpecialistStore::new(dir.path()).unwrap();
        store.insert(SpecialistRecord {
            id: 1,
            role: "cardiology".into(),
            name: "Cardiologist".into(),
            description: String::new(),
            system_prompt: "You are a cardiologist.".into(),
            enabled: true,
            tool_symbols: vec![],
        });
        store.insert(SpecialistRecord {
            id: 2,
            role: "psychiatry".into(),
            name: "Psychiatrist".into(),
            description: String::new(),
            system_prompt: "You are a psychiatrist.".into(),
            enabled: false,
            tool_symbols: vec![],
        });
        let enabled = store.list_enabled();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].role, "cardiology");
    }
}
