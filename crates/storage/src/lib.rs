//! Durable state for ClinAgent: chat sessions and messages (with the
//! streaming lifecycle), the patient catalogue, specialist records, and
//! persisted tool records.
//!
//! Every store is a JSON file under the configured state path, loaded at
//! startup and guarded by a `parking_lot::RwLock`. Writes happen inside
//! the lock so an assistant-row update is a single atomic file write.

pub mod chat;
pub mod patients;
pub mod specialists;
pub mod tools;

pub use chat::{ChatMessage, ChatRole, ChatSession, ChatStore, MessageStatus};
pub use patients::{MedicalRecord, Patient, PatientStore, RecordKind};
pub use specialists::{SpecialistRecord, SpecialistStore};
pub use tools::{ToolKind, ToolRecord, ToolRecordStore};
