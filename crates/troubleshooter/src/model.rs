use serde::{Deserialize, Serialize};

/// A class of equipment with its own catalog of known faults (e.g. "EX: Excavator").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineType {
    /// Short unique identifier, e.g. "EX"
    pub code: String,
    /// Canonical display name, e.g. "Excavator"
    pub name: String,
    /// Alternate names resolving to this machine (matched case-insensitively)
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Known faults for this machine type
    #[serde(default)]
    pub errors: Vec<ErrorEntry>,
}

/// A known fault condition (DTC) with its symptoms and ordered remediation steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// Diagnostic trouble code, e.g. "H1234"
    pub code: String,
    /// Short fault name, e.g. "Hydraulic Pressure Too Low"
    pub description: String,
    pub symptoms: Vec<String>,
    /// Performed in order
    pub steps: Vec<String>,
}

/// A catalog entry as returned to callers, with every machine linked to its code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: String,
    pub description: String,
    pub symptoms: Vec<String>,
    pub steps: Vec<String>,
    /// Display names of all machines this code applies to
    pub machines: Vec<String>,
    /// Ranker relevance in [0, 1]. Absent when unscored, which is not the same as 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
}

/// A symptom search hit. Always rehydrated from the catalog, never from ranker text.
pub type RankedResult = ErrorDetails;

/// One entry offered to the ranker for a single query.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchCandidate {
    pub id: String,
    pub text: String,
}

impl SearchCandidate {
    pub fn from_entry(entry: &ErrorEntry) -> Self {
        Self {
            id: entry.code.clone(),
            text: format!(
                "{} - Symptoms: {}",
                entry.description,
                entry.symptoms.join("; ")
            ),
        }
    }
}

impl From<ErrorDetails> for diag_common::mcp_api::ErrorDetailResponse {
    fn from(d: ErrorDetails) -> Self {
        Self {
            code: d.code,
            description: d.description,
            symptoms: d.symptoms,
            steps: d.steps,
            machines: d.machines,
            similarity: d.similarity,
        }
    }
}
