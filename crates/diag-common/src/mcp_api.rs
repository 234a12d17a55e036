use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ResolveMachineParams {
    /// Machine name or alias, e.g. "Excavator" or "digger". Case-insensitive, exact match.
    pub machine: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct LookupErrorParams {
    /// Machine name or alias the error code was reported on.
    pub machine: String,
    /// Diagnostic trouble code such as "H1234".
    pub error_code: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GetErrorParams {
    /// Diagnostic trouble code such as "E5678".
    pub error_code: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SearchSymptomsParams {
    /// Free-text description of what the technician observes.
    pub symptoms: String,
    /// Machine name or alias (default: the server's configured default machine).
    pub machine: Option<String>,
    /// Session id threaded to the ranking agent (default: a fresh id per call).
    pub session_id: Option<String>,
    /// Maximum number of results (default: 3, max: 10).
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct TelemetryAnalysisParams {
    /// Vehicle identification number; also used as the session id.
    pub vin: String,
    pub issue_description: String,
    /// Telemetry readings for this machine, as text or a rendered table.
    pub telemetry: String,
    /// Fleet-wide averages to compare against.
    pub fleet_averages: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CorrosionAnalysisParams {
    pub vin: String,
    pub issue_description: String,
    /// Corrosion metrics produced by the vision inspection.
    pub corrosion_metrics: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct TicketAnalysisParams {
    pub vin: String,
    pub issue_description: String,
    /// Service ticket history for this machine, as text or a rendered table.
    pub ticket_history: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct HandwrittenAnalysisParams {
    pub vin: String,
    pub issue_description: String,
    /// Text extracted from the technician's handwritten notes.
    pub note_text: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct TroubleshootParams {
    pub vin: String,
    pub issue_description: String,
    /// Machine name or alias used for the knowledge graph search.
    pub machine: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct FeedbackParams {
    pub vin: String,
    pub issue_description: String,
    /// The agent answer the feedback refers to.
    pub agent_output: String,
    pub feedback: String,
    /// Pipeline step the answer came from (0 telemetry .. 5 manager analysis).
    pub step_number: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MachineInfo {
    pub code: String,
    pub name: String,
    pub aliases: Vec<String>,
    pub error_codes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MachineListResponse {
    pub machines: Vec<MachineInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResolveMachineResponse {
    pub input: String,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ErrorDetailResponse {
    pub code: String,
    pub description: String,
    pub symptoms: Vec<String>,
    pub steps: Vec<String>,
    pub machines: Vec<String>,
    /// Ranker relevance in [0, 1]; absent when the entry was not scored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SymptomSearchResponse {
    pub machine: String,
    pub results: Vec<ErrorDetailResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StepOutputResponse {
    pub step_number: u8,
    pub step: String,
    pub output: String,
    pub status: String,
    /// Seconds since the Unix epoch when the step finished.
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FeedbackResponse {
    pub step_number: u8,
    pub feedback_received: bool,
}
