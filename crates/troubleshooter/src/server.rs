/// MCP server for equipment troubleshooting.
///
/// Knowledge graph tools:
/// - `list_machines`, `resolve_machine`: catalog browsing and name/alias resolution
/// - `lookup_error`, `get_error`: exact error code lookup
/// - `search_symptoms`: ranked free-text symptom search
///
/// Diagnostic pipeline tools (session = VIN):
/// - `analyze_telemetry`, `analyze_corrosion`, `analyze_tickets`, `analyze_handwritten_notes`
/// - `troubleshoot`, `root_cause_analysis`
/// - `submit_feedback`
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rmcp::{
    Json, ServerHandler,
    handler::server::router::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::*,
    tool, tool_handler, tool_router,
};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::pipeline::{DiagnosticPipeline, StepOutcome};
use crate::search::SymptomSearch;
use diag_common::mcp_api::{
    CorrosionAnalysisParams, ErrorDetailResponse, FeedbackParams, FeedbackResponse,
    GetErrorParams, HandwrittenAnalysisParams, LookupErrorParams, MachineInfo,
    MachineListResponse, ResolveMachineParams, ResolveMachineResponse, SearchSymptomsParams,
    StepOutputResponse, SymptomSearchResponse, TelemetryAnalysisParams, TicketAnalysisParams,
    TroubleshootParams,
};

const MAX_SEARCH_LIMIT: u32 = 10;

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Clone)]
pub struct TroubleshooterServer {
    search: Arc<SymptomSearch>,
    pipeline: Arc<DiagnosticPipeline>,
    default_machine: String,
    default_limit: usize,
    tool_router: ToolRouter<TroubleshooterServer>,
}

impl TroubleshooterServer {
    pub fn new(
        search: Arc<SymptomSearch>,
        pipeline: Arc<DiagnosticPipeline>,
        default_machine: String,
        default_limit: usize,
    ) -> Self {
        Self {
            search,
            pipeline,
            default_machine,
            default_limit,
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router]
impl TroubleshooterServer {
    #[tool(description = "List every machine type in the error catalog with its aliases and error codes.")]
    async fn list_machines(&self) -> Result<Json<MachineListResponse>, String> {
        let machines = self
            .search
            .graph()
            .machines()
            .map(|m| MachineInfo {
                code: m.code.clone(),
                name: m.name.clone(),
                aliases: m.aliases.clone(),
                error_codes: m.errors.iter().map(|e| e.code.clone()).collect(),
            })
            .collect();
        Ok(Json(MachineListResponse { machines }))
    }

    #[tool(description = "Resolve a machine name or alias (case-insensitive, exact) to its canonical machine code.")]
    async fn resolve_machine(
        &self,
        Parameters(params): Parameters<ResolveMachineParams>,
    ) -> Result<Json<ResolveMachineResponse>, String> {
        let graph = self.search.graph();
        let code = graph.resolve_machine(&params.machine).map_err(|e| e.to_string())?;
        let name = graph
            .machine(code)
            .map(|m| m.name.clone())
            .unwrap_or_default();
        Ok(Json(ResolveMachineResponse {
            input: params.machine,
            code: code.to_string(),
            name,
        }))
    }

    #[tool(description = "Look up an error code (e.g. 'H1234') reported on a given machine. Returns its description, symptoms and ordered remediation steps.")]
    async fn lookup_error(
        &self,
        Parameters(params): Parameters<LookupErrorParams>,
    ) -> Result<Json<ErrorDetailResponse>, String> {
        let error_code = params.error_code.trim();
        if error_code.is_empty() {
            return Err("error_code must not be empty".to_string());
        }
        let details = self
            .search
            .graph()
            .lookup_error(&params.machine, error_code)
            .map_err(|e| e.to_string())?;
        Ok(Json(details.into()))
    }

    #[tool(description = "Get the catalog entry for an error code regardless of machine, listing every machine type it applies to.")]
    async fn get_error(
        &self,
        Parameters(params): Parameters<GetErrorParams>,
    ) -> Result<Json<ErrorDetailResponse>, String> {
        let error_code = params.error_code.trim();
        if error_code.is_empty() {
            return Err("error_code must not be empty".to_string());
        }
        let details = self
            .search
            .graph()
            .get_details(error_code, None)
            .map_err(|e| e.to_string())?;
        Ok(Json(details.into()))
    }

    #[tool(description = "Rank a machine's known errors against a free-text symptom description. Returns the most relevant catalog entries with a similarity in [0, 1].")]
    async fn search_symptoms(
        &self,
        Parameters(params): Parameters<SearchSymptomsParams>,
    ) -> Result<Json<SymptomSearchResponse>, String> {
        let symptoms = params.symptoms.trim();
        if symptoms.is_empty() {
            return Err("symptoms must not be empty".to_string());
        }

        let machine = params.machine.unwrap_or_else(|| self.default_machine.clone());
        let session_id = params.session_id.unwrap_or_else(new_session_id);
        let limit = params
            .limit
            .map(|l| l.clamp(1, MAX_SEARCH_LIMIT) as usize)
            .unwrap_or(self.default_limit);

        let results = self
            .search
            .extract_steps(&machine, symptoms, &session_id, limit)
            .await
            .map_err(|e| e.to_string())?;

        Ok(Json(SymptomSearchResponse {
            machine,
            results: results.into_iter().map(ErrorDetailResponse::from).collect(),
        }))
    }

    #[tool(description = "Step 0: analyze telemetry readings against fleet averages for a machine (by VIN) and a reported issue.")]
    async fn analyze_telemetry(
        &self,
        Parameters(params): Parameters<TelemetryAnalysisParams>,
    ) -> Result<Json<StepOutputResponse>, String> {
        let vin = require_vin(&params.vin)?;
        let outcome = self
            .pipeline
            .analyze_telemetry(
                vin,
                &params.issue_description,
                &params.telemetry,
                params.fleet_averages.as_deref(),
            )
            .await
            .map_err(|e| e.to_string())?;
        Ok(Json(step_response(outcome)))
    }

    #[tool(description = "Step 1: analyze corrosion metrics from a visual inspection in the context of a reported issue.")]
    async fn analyze_corrosion(
        &self,
        Parameters(params): Parameters<CorrosionAnalysisParams>,
    ) -> Result<Json<StepOutputResponse>, String> {
        let vin = require_vin(&params.vin)?;
        let outcome = self
            .pipeline
            .analyze_corrosion(vin, &params.issue_description, &params.corrosion_metrics)
            .await
            .map_err(|e| e.to_string())?;
        Ok(Json(step_response(outcome)))
    }

    #[tool(description = "Step 2: analyze a machine's service ticket history in the context of a reported issue.")]
    async fn analyze_tickets(
        &self,
        Parameters(params): Parameters<TicketAnalysisParams>,
    ) -> Result<Json<StepOutputResponse>, String> {
        let vin = require_vin(&params.vin)?;
        let outcome = self
            .pipeline
            .analyze_tickets(vin, &params.issue_description, &params.ticket_history)
            .await
            .map_err(|e| e.to_string())?;
        Ok(Json(step_response(outcome)))
    }

    #[tool(description = "Step 3: analyze text transcribed from a technician's handwritten notes.")]
    async fn analyze_handwritten_notes(
        &self,
        Parameters(params): Parameters<HandwrittenAnalysisParams>,
    ) -> Result<Json<StepOutputResponse>, String> {
        let vin = require_vin(&params.vin)?;
        let outcome = self
            .pipeline
            .analyze_handwritten(vin, &params.issue_description, &params.note_text)
            .await
            .map_err(|e| e.to_string())?;
        Ok(Json(step_response(outcome)))
    }

    #[tool(description = "Step 4: produce troubleshooting steps from the session's analyses and the top knowledge graph matches for the issue.")]
    async fn troubleshoot(
        &self,
        Parameters(params): Parameters<TroubleshootParams>,
    ) -> Result<Json<StepOutputResponse>, String> {
        let vin = require_vin(&params.vin)?;
        let outcome = self
            .pipeline
            .troubleshoot(vin, &params.issue_description, params.machine.as_deref())
            .await
            .map_err(|e| e.to_string())?;
        Ok(Json(step_response(outcome)))
    }

    #[tool(description = "Step 5: manager-level root cause analysis built on the session's troubleshooting result (generated first if missing).")]
    async fn root_cause_analysis(
        &self,
        Parameters(params): Parameters<TroubleshootParams>,
    ) -> Result<Json<StepOutputResponse>, String> {
        let vin = require_vin(&params.vin)?;
        let outcome = self
            .pipeline
            .root_cause(vin, &params.issue_description, params.machine.as_deref())
            .await
            .map_err(|e| e.to_string())?;
        Ok(Json(step_response(outcome)))
    }

    #[tool(description = "Send technician feedback on a step's output (step_number 0-5) to the agent that produced it.")]
    async fn submit_feedback(
        &self,
        Parameters(params): Parameters<FeedbackParams>,
    ) -> Result<Json<FeedbackResponse>, String> {
        let vin = require_vin(&params.vin)?;
        info!(vin, step_number = params.step_number, "submit_feedback tool invoked");
        self.pipeline
            .submit_feedback(
                vin,
                &params.issue_description,
                &params.agent_output,
                &params.feedback,
                params.step_number,
            )
            .await
            .map_err(|e| format!("feedback failed: {e}"))?;
        Ok(Json(FeedbackResponse {
            step_number: params.step_number,
            feedback_received: true,
        }))
    }
}

fn require_vin(vin: &str) -> Result<&str, String> {
    let vin = vin.trim();
    if vin.is_empty() {
        return Err("vin must not be empty".to_string());
    }
    Ok(vin)
}

fn step_response(outcome: StepOutcome) -> StepOutputResponse {
    StepOutputResponse {
        step_number: outcome.step.number(),
        step: outcome.step.name().to_string(),
        output: outcome.output,
        status: if outcome.succeeded { "success" } else { "error" }.to_string(),
        timestamp: unix_now().as_secs(),
    }
}

fn unix_now() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
}

/// Session id for searches made outside any VIN session.
fn new_session_id() -> String {
    let counter = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut h = Sha256::new();
    h.update(unix_now().as_nanos().to_le_bytes());
    h.update(std::process::id().to_le_bytes());
    h.update(counter.to_le_bytes());
    let digest = h.finalize();
    format!("search-{:x}", digest)[..23].to_string()
}

#[tool_handler]
impl ServerHandler for TroubleshooterServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_06_18,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .build(),
            server_info: Implementation {
                name: "troubleshooter".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Heavy-equipment troubleshooting MCP server. Use lookup_error when the \
                 machine reported a code, search_symptoms for free-text symptoms, and the \
                 analyze_* tools followed by troubleshoot and root_cause_analysis to run a \
                 full diagnosis for one VIN. submit_feedback rates a step's output."
                    .to_string(),
            ),
        }
    }
}
