//! Patient reference detection in streamed assistant text.
//!
//! Scans the accumulated text for whole-word name matches and ID phrases
//! against the known patient catalogue, keeping a non-overlapping span set.
//! Passes run periodically during streaming (every 50 chunks, or when a
//! chunk exceeds 100 chars) and once after the stream ends; each pass
//! emits only spans not previously emitted for the turn.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use ca_storage::Patient;

/// A detected span of assistant text referring to a patient. Offsets are
/// half-open character offsets into the accumulated text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientReference {
    pub patient_id: i64,
    pub patient_name: String,
    pub start_index: usize,
    pub end_index: usize,
}

const PASS_CHUNK_INTERVAL: usize = 50;
const LARGE_CHUNK_CHARS: usize = 100;

pub struct PatientDetector {
    candidates: Vec<Patient>,
    emitted: HashSet<(i64, usize)>,
    chunks_since_pass: usize,
}

impl PatientDetector {
    /// `context_patient` (from the request) is scanned first, then the
    /// rest of the catalogue.
    pub fn new(context_patient: Option<Patient>, mut catalogue: Vec<Patient>) -> Self {
        let mut candidates = Vec::new();
        let mut seen = HashSet::new();
        if let Some(patient) = context_patient {
            seen.insert(patient.id);
            candidates.push(patient);
        }
        catalogue.retain(|p| !seen.contains(&p.id));
        candidates.append(&mut catalogue);
        Self {
            candidates,
            emitted: HashSet::new(),
            chunks_since_pass: 0,
        }
    }

    /// Heuristic trigger: run a pass every `PASS_CHUNK_INTERVAL` content
    /// chunks, or immediately after a large chunk.
    pub fn should_run(&mut self, chunk: &str) -> bool {
        self.chunks_since_pass += 1;
        if self.chunks_since_pass >= PASS_CHUNK_INTERVAL || chunk.chars().count() > LARGE_CHUNK_CHARS
        {
            self.chunks_since_pass = 0;
            true
        } else {
            false
        }
    }

    /// Run a detection pass over the full accumulated text, returning only
    /// spans that are new with respect to everything previously emitted
    /// (dedup key: `(patient_id, start_index)`).
    pub fn pass(&mut self, text: &str) -> Vec<PatientReference> {
        let mut fresh = Vec::new();
        for reference in detect_references(text, &self.candidates) {
            if self.emitted.insert((reference.patient_id, reference.start_index)) {
                fresh.push(reference);
            }
        }
        fresh
    }

    /// Every span emitted so far.
    pub fn emitted_count(&self) -> usize {
        self.emitted.len()
    }
}

/// The full greedy non-overlapping reference set for `text`.
pub fn detect_references(text: &str, candidates: &[Patient]) -> Vec<PatientReference> {
    let mut references = Vec::new();

    for patient in candidates {
        for (start, end) in find_spans(text, patient) {
            references.push(PatientReference {
                patient_id: patient.id,
                patient_name: patient.name.clone(),
                start_index: start,
                end_index: end,
            });
        }
    }

    // Sort by (start asc, length desc) so ties prefer the longer span,
    // then greedily drop anything intersecting a kept span.
    references.sort_by(|a, b| {
        a.start_index
            .cmp(&b.start_index)
            .then((b.end_index - b.start_index).cmp(&(a.end_index - a.start_index)))
    });

    let mut kept: Vec<PatientReference> = Vec::new();
    for reference in references {
        let overlaps = kept.iter().any(|existing| {
            reference.start_index < existing.end_index && existing.start_index < reference.end_index
        });
        if !overlaps {
            kept.push(reference);
        }
    }
    kept
}

/// Name and ID-phrase spans for one patient, as character offsets.
fn find_spans(text: &str, patient: &Patient) -> Vec<(usize, usize)> {
    let mut patterns = Vec::new();

    if !patient.name.trim().is_empty() {
        patterns.push(format!(r"\b{}\b", regex::escape(&patient.name)));
    }
    let id = patient.id;
    patterns.push(format!(r"\bPatient ID[:\s]+{id}\b"));
    patterns.push(format!(r"\bPatient\s+#?{id}\b"));
    patterns.push(format!(r"\bID[:\s]+{id}\b"));

    let mut spans = Vec::new();
    for pattern in patterns {
        let Ok(re) = regex::RegexBuilder::new(&pattern)
            .case_insensitive(true)
            .build()
        else {
            tracing::warn!(pattern = %pattern, "invalid detection pattern");
            continue;
        };
        for found in re.find_iter(text) {
            spans.push((
                byte_to_char(text, found.start()),
                byte_to_char(text, found.end()),
            ));
        }
    }
    spans
}

fn byte_to_char(text: &str, byte_index: usize) -> usize {
    text[..byte_index].chars().count()
}
