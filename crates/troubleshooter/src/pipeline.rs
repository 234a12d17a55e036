/// Diagnostic pipeline: one agent call per step, outputs kept per session (the VIN).
///
/// Steps 0-3 analyse one kind of evidence each. Step 4 combines whatever analyses the
/// session holds with the knowledge graph's top results; step 5 hands the troubleshooting
/// result to the manager agent for a root-cause summary.
use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::{DiagnosticCache, ISSUE_FIELD};
use crate::config::AgentIds;
use crate::error::AppError;
use crate::search::SymptomSearch;
use diag_common::agent::AgentChat;
use diag_common::error::CommonError;

const KG_PLACEHOLDER: &str = "Knowledge Graph analysis not available";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Telemetry,
    Corrosion,
    Tickets,
    Handwritten,
    Troubleshooting,
    ManagerAnalysis,
}

impl Step {
    pub const ALL: [Step; 6] = [
        Step::Telemetry,
        Step::Corrosion,
        Step::Tickets,
        Step::Handwritten,
        Step::Troubleshooting,
        Step::ManagerAnalysis,
    ];

    pub fn number(self) -> u8 {
        match self {
            Step::Telemetry => 0,
            Step::Corrosion => 1,
            Step::Tickets => 2,
            Step::Handwritten => 3,
            Step::Troubleshooting => 4,
            Step::ManagerAnalysis => 5,
        }
    }

    pub fn from_number(n: u8) -> Result<Self, AppError> {
        Self::ALL
            .into_iter()
            .find(|s| s.number() == n)
            .ok_or(AppError::UnknownStep(n))
    }

    pub fn name(self) -> &'static str {
        match self {
            Step::Telemetry => "telemetry",
            Step::Corrosion => "corrosion",
            Step::Tickets => "tickets",
            Step::Handwritten => "handwritten",
            Step::Troubleshooting => "troubleshooting",
            Step::ManagerAnalysis => "manager_analysis",
        }
    }

    /// Session hash field holding this step's latest successful output.
    pub fn cache_field(self) -> &'static str {
        match self {
            Step::Telemetry => "telemetry_analysis",
            Step::Corrosion => "corrosion_analysis",
            Step::Tickets => "ticket_analysis",
            Step::Handwritten => "handwritten_analysis",
            Step::Troubleshooting => "troubleshooting_result",
            Step::ManagerAnalysis => "manager_analysis",
        }
    }

    fn failure_message(self) -> &'static str {
        match self {
            Step::Telemetry => "Error: Unable to analyze telemetry data.",
            Step::Corrosion => "Error: Unable to analyze corrosion metrics.",
            Step::Tickets => "Error: Unable to analyze ticket history.",
            Step::Handwritten => "Error: Unable to process handwritten notes.",
            Step::Troubleshooting => "Error: Unable to troubleshoot.",
            Step::ManagerAnalysis => "Error: Unable to generate root cause analysis.",
        }
    }

    /// Stand-in text used by the troubleshooting step when an analysis is missing.
    fn placeholder(self) -> &'static str {
        match self {
            Step::Telemetry => "Telemetry data not available",
            Step::Corrosion => "Corrosion analysis not available",
            Step::Tickets => "Ticket history not available",
            Step::Handwritten => "Handwritten analysis not available",
            Step::Troubleshooting => "Troubleshooting result not available",
            Step::ManagerAnalysis => "Manager analysis not available",
        }
    }
}

/// Result of one step. A failed agent call still yields text, never an error.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub step: Step,
    pub output: String,
    pub succeeded: bool,
}

pub struct DiagnosticPipeline {
    agent: Arc<dyn AgentChat>,
    agents: AgentIds,
    search: Arc<SymptomSearch>,
    cache: Arc<DiagnosticCache>,
    default_machine: String,
    top_k: usize,
}

impl DiagnosticPipeline {
    pub fn new(
        agent: Arc<dyn AgentChat>,
        agents: AgentIds,
        search: Arc<SymptomSearch>,
        cache: Arc<DiagnosticCache>,
        default_machine: String,
        top_k: usize,
    ) -> Self {
        Self {
            agent,
            agents,
            search,
            cache,
            default_machine,
            top_k,
        }
    }

    pub async fn analyze_telemetry(
        &self,
        vin: &str,
        issue: &str,
        telemetry: &str,
        fleet_averages: Option<&str>,
    ) -> Result<StepOutcome, AppError> {
        let message = format!(
            "Telemetry Data: {telemetry}\nFleet Averages: {}\nIssue Description: {issue}",
            fleet_averages.unwrap_or("not provided")
        );
        self.run_step(Step::Telemetry, vin, issue, &message).await
    }

    pub async fn analyze_corrosion(
        &self,
        vin: &str,
        issue: &str,
        corrosion_metrics: &str,
    ) -> Result<StepOutcome, AppError> {
        let message = format!("Corrosion Analysis: {corrosion_metrics}\nIssue Description: {issue}");
        self.run_step(Step::Corrosion, vin, issue, &message).await
    }

    pub async fn analyze_tickets(
        &self,
        vin: &str,
        issue: &str,
        ticket_history: &str,
    ) -> Result<StepOutcome, AppError> {
        let message = format!("Ticket History: {ticket_history}\nIssue Description: {issue}");
        self.run_step(Step::Tickets, vin, issue, &message).await
    }

    pub async fn analyze_handwritten(
        &self,
        vin: &str,
        issue: &str,
        note_text: &str,
    ) -> Result<StepOutcome, AppError> {
        let message = format!("Handwritten Notes: {note_text}\nIssue Description: {issue}");
        self.run_step(Step::Handwritten, vin, issue, &message).await
    }

    /// Combine the session's analyses with the knowledge graph's top results.
    pub async fn troubleshoot(
        &self,
        vin: &str,
        issue: &str,
        machine: Option<&str>,
    ) -> Result<StepOutcome, AppError> {
        // Fail on a missing agent before spending a ranker call.
        self.agents.for_step(Step::Troubleshooting)?;

        let machine = machine.unwrap_or(&self.default_machine);
        let (session, kg_output) = futures::join!(
            self.cache.get_session(vin),
            self.knowledge_graph_output(vin, machine, issue)
        );
        let analyses = [Step::Telemetry, Step::Corrosion, Step::Tickets, Step::Handwritten]
            .map(|step| {
                session
                    .get(step.cache_field())
                    .map(String::as_str)
                    .unwrap_or(step.placeholder())
            });

        let message = format!(
            "Issue Description: {issue}\nTelemetry Analysis: {}\nCorrosion Analysis: {}\n\
             Ticket Analysis: {}\nHandwritten Analysis: {}\nKnowledge Graph Analysis: {kg_output}",
            analyses[0], analyses[1], analyses[2], analyses[3]
        );
        self.run_step(Step::Troubleshooting, vin, issue, &message).await
    }

    /// Manager-level root cause analysis, troubleshooting first when the session has none.
    pub async fn root_cause(
        &self,
        vin: &str,
        issue: &str,
        machine: Option<&str>,
    ) -> Result<StepOutcome, AppError> {
        self.agents.for_step(Step::ManagerAnalysis)?;

        let troubleshooting = match self
            .cache
            .get_session_field(vin, Step::Troubleshooting.cache_field())
            .await
        {
            Some(cached) => cached,
            None => {
                info!(vin, "no troubleshooting result in session, generating one");
                self.troubleshoot(vin, issue, machine).await?.output
            }
        };

        let message =
            format!("VIN: {vin}\nIssue Description: {issue}\nTroubleshooting Result: {troubleshooting}");
        self.run_step(Step::ManagerAnalysis, vin, issue, &message).await
    }

    /// Forward a technician's verdict on a step's output to that step's agent.
    pub async fn submit_feedback(
        &self,
        vin: &str,
        issue: &str,
        agent_output: &str,
        feedback: &str,
        step_number: u8,
    ) -> Result<Step, AppError> {
        let step = Step::from_number(step_number)?;
        let agent_id = self.agents.for_step(step)?;
        let user_input = format!("VIN: {vin} Issue: {issue}");
        self.agent
            .send_feedback(&user_input, agent_output, feedback, agent_id)
            .await
            .map_err(|e| AppError::Common(CommonError::from(e)))?;
        info!(vin, step = step.name(), "feedback forwarded");
        Ok(step)
    }

    async fn run_step(
        &self,
        step: Step,
        vin: &str,
        issue: &str,
        message: &str,
    ) -> Result<StepOutcome, AppError> {
        let agent_id = self.agents.for_step(step)?;
        self.cache.set_session_field(vin, ISSUE_FIELD, issue).await;

        match self.agent.chat(agent_id, vin, message).await {
            Ok(output) => {
                self.cache
                    .set_session_field(vin, step.cache_field(), &output)
                    .await;
                info!(vin, step = step.name(), "step complete");
                Ok(StepOutcome {
                    step,
                    output,
                    succeeded: true,
                })
            }
            Err(e) => {
                warn!(vin, step = step.name(), error = %e, "agent call failed");
                Ok(StepOutcome {
                    step,
                    output: step.failure_message().to_string(),
                    succeeded: false,
                })
            }
        }
    }

    /// Top results as pretty JSON, or the search failure as text.
    async fn knowledge_graph_output(&self, vin: &str, machine: &str, issue: &str) -> String {
        match self.search.extract_steps(machine, issue, vin, self.top_k).await {
            Ok(results) => serde_json::to_string_pretty(&results)
                .unwrap_or_else(|_| KG_PLACEHOLDER.to_string()),
            Err(e) => {
                warn!(vin, machine, error = %e, "knowledge graph search failed");
                e.to_string()
            }
        }
    }
}
