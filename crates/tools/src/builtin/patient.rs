//! Patient lookup against the patient store.
//!
//! Assignable-scope: only the internist sub-agent sees this tool; the main
//! agent reaches it through delegation.

use std::sync::Arc;

use ca_domain::tool::{ToolDefinition, ToolScope};
use ca_storage::{PatientStore, RecordKind};

use crate::registry::{NativeTool, RegisteredTool};

use super::{arg_str, CORE_INTERNIST_ID};

pub fn patient_info_tool(patients: Arc<PatientStore>) -> RegisteredTool {
    RegisteredTool {
        definition: ToolDefinition {
            name: "query_patient_info".into(),
            description: "Query patient demographics and medical records. Search by \
                          patient ID (e.g. \"23\") or name (e.g. \"John Smith\")."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Patient ID or name to search for"
                    }
                },
                "required": ["query"]
            }),
        },
        scope: ToolScope::Assignable,
        assigned_specialist_id: Some(CORE_INTERNIST_ID),
        enabled: true,
        handler: NativeTool::new(move |args| {
            let query = arg_str(args, "query").unwrap_or("").trim().to_string();
            Ok(lookup(&patients, &query))
        }),
    }
}

fn lookup(patients: &PatientStore, query: &str) -> String {
    if query.is_empty() {
        return "Error: query must not be empty".into();
    }

    let patient = match query.parse::<i64>() {
        Ok(id) => patients.get(id),
        Err(_) => patients.find_by_name(query),
    };

    let Some(patient) = patient else {
        return format!("No patient found matching query: '{query}'");
    };

    let mut lines = vec![
        format!("Patient Found: {} (ID: {})", patient.name, patient.id),
        format!("DOB: {}", patient.dob.as_deref().unwrap_or("unknown")),
        format!("Gender: {}", patient.gender.as_deref().unwrap_or("unknown")),
        String::new(),
        "Recent Medical Records:".into(),
    ];

    let records = patients.patient_records(patient.id);
    if records.is_empty() {
        lines.push("  No records found.".into());
    } else {
        // Most recent five, newest first.
        for record in records.iter().rev().take(5) {
            let kind = match record.kind {
                RecordKind::Text => "TEXT",
                RecordKind::Image => "IMAGE",
                RecordKind::Pdf => "PDF",
            };
            let title = record
                .summary
                .clone()
                .unwrap_or_else(|| first_line_title(&record.content));
            lines.push(format!("  - {kind}: {title}"));
        }
    }

    lines.join("\n")
}

fn first_line_title(content: &str) -> String {
    let first = content.lines().next().unwrap_or("");
    if first.chars().count() > 30 {
        let prefix: String = first.chars().take(30).collect();
        format!("{prefix}...")
    } else {
        first.to_string()
    }
}
