use std::path::PathBuf;

use crate::error::AppError;
use crate::pipeline::Step;
use crate::search::DEFAULT_TOP_K;

/// Agent ids per pipeline step. Only the knowledge-graph agent is mandatory; a step whose
/// agent is not configured fails with a config error when invoked.
#[derive(Debug, Clone, Default)]
pub struct AgentIds {
    pub knowledge_graph: String,
    pub telemetry: Option<String>,
    pub corrosion: Option<String>,
    pub tickets: Option<String>,
    pub handwritten: Option<String>,
    pub troubleshooting: Option<String>,
    pub manager: Option<String>,
}

impl AgentIds {
    pub fn for_step(&self, step: Step) -> Result<&str, AppError> {
        let (id, var) = match step {
            Step::Telemetry => (&self.telemetry, "TELEMETRY_AGENT_ID"),
            Step::Corrosion => (&self.corrosion, "CORROSION_AGENT_ID"),
            Step::Tickets => (&self.tickets, "TICKET_AGENT_ID"),
            Step::Handwritten => (&self.handwritten, "OCR_AGENT_ID"),
            Step::Troubleshooting => (&self.troubleshooting, "TROUBLESHOOTING_AGENT_ID"),
            Step::ManagerAnalysis => (&self.manager, "MANAGER_AGENT_ID"),
        };
        id.as_deref()
            .ok_or_else(|| AppError::Config(format!("{var} is not set; {} step unavailable", step.name())))
    }
}

/// Application configuration loaded explicitly from environment variables.
///
/// Redis URL is optional; if absent, search results are not cached and session analyses
/// live only in process memory.
#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: Option<String>,
    pub agents: AgentIds,
    /// Machine searched when a caller does not name one.
    pub default_machine: String,
    /// Results kept from a symptom search by the pipeline.
    pub top_k: usize,
    pub session_ttl_secs: u64,
    /// JSON catalog replacing the built-in one.
    pub catalog_path: Option<PathBuf>,
    /// Serve MCP over TCP on this address instead of stdio.
    pub tcp_listen_addr: Option<String>,
}

impl Config {
    /// Required:
    /// - `KG_AGENT`: agent id used to rank symptom searches
    ///
    /// Optional:
    /// - `TELEMETRY_AGENT_ID`, `CORROSION_AGENT_ID`, `TICKET_AGENT_ID`, `OCR_AGENT_ID`,
    ///   `TROUBLESHOOTING_AGENT_ID`, `MANAGER_AGENT_ID`
    /// - `REDIS_URL`
    /// - `DEFAULT_MACHINE` (default: "Excavator")
    /// - `KG_TOP_K` (default: 3)
    /// - `SESSION_TTL_SECS` (default: 86400)
    /// - `CATALOG_PATH`
    /// - `MCP_TCP_LISTEN_ADDR`
    pub fn from_env() -> Result<Self, AppError> {
        let knowledge_graph = non_empty("KG_AGENT").ok_or_else(|| {
            AppError::Config("KG_AGENT environment variable is required".to_string())
        })?;

        let top_k = match non_empty("KG_TOP_K") {
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|&k| k > 0)
                .ok_or_else(|| AppError::Config(format!("KG_TOP_K must be a positive integer, got '{raw}'")))?,
            None => DEFAULT_TOP_K,
        };

        let session_ttl_secs = non_empty("SESSION_TTL_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(86_400);

        let catalog_path = non_empty("CATALOG_PATH").map(PathBuf::from);
        if let Some(path) = &catalog_path {
            if !path.exists() {
                return Err(AppError::Config(format!(
                    "catalog file not found: {}",
                    path.display()
                )));
            }
        }

        Ok(Self {
            redis_url: non_empty("REDIS_URL"),
            agents: AgentIds {
                knowledge_graph,
                telemetry: non_empty("TELEMETRY_AGENT_ID"),
                corrosion: non_empty("CORROSION_AGENT_ID"),
                tickets: non_empty("TICKET_AGENT_ID"),
                handwritten: non_empty("OCR_AGENT_ID"),
                troubleshooting: non_empty("TROUBLESHOOTING_AGENT_ID"),
                manager: non_empty("MANAGER_AGENT_ID"),
            },
            default_machine: non_empty("DEFAULT_MACHINE").unwrap_or_else(|| "Excavator".to_string()),
            top_k,
            session_ttl_secs,
            catalog_path,
            tcp_listen_addr: non_empty("MCP_TCP_LISTEN_ADDR"),
        })
    }
}

fn non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
