/// Error types shared across the diagnostic crates.
///
/// These cover infrastructure that more than one binary relies on (agent endpoint,
/// client configuration). Application-specific errors live in each binary crate and
/// wrap `CommonError` via `#[from]`.
use crate::agent::AgentClientError;

#[derive(Debug, thiserror::Error)]
pub enum CommonError {
    #[error("config error: {0}")]
    Config(String),

    #[error("agent error: {0}")]
    Agent(#[from] AgentClientError),
}
