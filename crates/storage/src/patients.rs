//! Patient catalogue and medical records.
//!
//! Read-mostly reference data: the turn runtime reads it for context
//! prefixes and the entity detector scans assistant text against it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use ca_domain::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub dob: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Text,
    Image,
    Pdf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicalRecord {
    pub id: i64,
    pub patient_id: i64,
    pub kind: RecordKind,
    /// Text content, or a file reference for image/pdf records.
    pub content: String,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PatientState {
    patients: HashMap<i64, Patient>,
    records: HashMap<i64, MedicalRecord>,
}

/// Patient store backed by `patients.json` under the state path.
pub struct PatientStore {
    #[allow(dead_code)]
    path: PathBuf,
    state: RwLock<PatientState>,
}

impl PatientStore {
    pub fn new(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;
        let path = state_path.join("patients.json");
        let state = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            PatientState::default()
        };

        tracing::info!(
            patients = state.patients.len(),
            records = state.records.len(),
            "patient store loaded"
        );

        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    pub fn get(&self, id: i64) -> Option<Patient> {
        self.state.read().patients.get(&id).cloned()
    }

    /// All patients, ordered by id for deterministic detection passes.
    pub fn list(&self) -> Vec<Patient> {
        let state = self.state.read();
        let mut patients: Vec<_> = state.patients.values().cloned().collect();
        patients.sort_by_key(|p| p.id);
        patients
    }

    /// Case-insensitive exact name lookup.
    pub fn find_by_name(&self, name: &str) -> Option<Patient> {
        let needle = name.to_lowercase();
        self.state
            .read()
            .patients
            .values()
            .find(|p| p.name.to_lowercase() == needle)
            .cloned()
    }

    pub fn get_record(&self, id: i64) -> Option<MedicalRecord> {
        self.state.read().records.get(&id).cloned()
    }

    /// Records belonging to a patient, ordered by id.
    pub fn patient_records(&self, patient_id: i64) -> Vec<MedicalRecord> {
        let state = self.state.read();
        let mut records: Vec<_> = state
            .records
            .values()
            .filter(|r| r.patient_id == patient_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.id);
        records
    }

    /// Test/seed helper: insert rows directly.
    pub fn insert_patient(&self, patient: Patient) {
        self.state.write().patients.insert(patient.id, patient);
    }

    pub fn insert_record(&self, record: MedicalRecord) {
        self.state.write().records.insert(record.id, record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> (tempfile::TempDir, PatientStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = PatientStore::new(dir.path()).unwrap();
        store.insert_patient(Patient {
            id: 23,
            name: "John Smith".into(),
            dob: Some("1962-04-11".into()),
            gender: Some("male".into()),
        });
        store.insert_patient(Patient {
            id: 7,
            name: "Maria Garcia".into(),
            dob: None,
            gender: None,
        });
        (dir, store)
    }

    #[test]
    fn get_and_list_ordered_by_id() {
        let (_dir, store) = seeded();
        assert_eq!(store.get(23).unwrap().name, "John Smith");
        let ids: Vec<_> = store.list().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![7, 23]);
    }

    #[test]
    fn find_by_name_is_case_insensitive() {
        let (_dir, store) = seeded();
        assert_eq!(store.find_by_name("maria garcia").unwrap().id, 7);
        assert!(store.find_by_name("nobody").is_none());
    }

    #[test]
    fn patient_records_filtered_and_ordered() {
        let (_dir, store) = seeded();
        store.insert_record(MedicalRecord {
            id: 2,
            patient_id: 23,
            kind: RecordKind::Text,
            content: "BP stable".into(),
            summary: None,
        });
        store.insert_record(MedicalRecord {
            id: 1,
            patient_id: 23,
            kind: RecordKind::Pdf,
            content: "labs.pdf".into(),
            summary: Some("lab panel".into()),
        });
        store.insert_record(MedicalRecord {
            id: 3,
            patient_id: 7,
            kind: RecordKind::Text,
            content: "unrelated".into(),
            summary: None,
        });
        let ids: Vec<_> = store.patient_records(23).iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
