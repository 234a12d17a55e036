use diag_common::error::CommonError;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Common(#[from] CommonError),

    #[error("config error: {0}")]
    Config(String),

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("unknown pipeline step: {0} (expected 0-5)")]
    UnknownStep(u8),
}

/// Failures of the error knowledge graph. All are recoverable and returned as values so
/// callers can render a message per kind.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KgError {
    #[error("Machine '{machine}' not found.")]
    MachineNotFound { machine: String },

    #[error(
        "Error code '{code}' not found{}.",
        .machine.as_deref().map(|m| format!(" for machine '{m}'")).unwrap_or_default()
    )]
    ErrorCodeNotFound {
        code: String,
        machine: Option<String>,
    },

    #[error("No errors found for machine '{machine}'.")]
    EmptyCatalogForMachine { machine: String },

    #[error("Invalid JSON response from ranker: {raw}")]
    RankerMalformedResponse { raw: String },

    #[error("Unexpected response format: {shape}")]
    RankerUnexpectedShape { shape: String },

    #[error("No relevant matches found based on search criteria.")]
    NoRelevantMatches,

    #[error("Semantic search failed: {message}")]
    RankerCallFailed { message: String },
}

#[cfg(test)]
mod tests {
    use super::KgError;

    #[test]
    fn error_code_message_mentions_machine_only_when_known() {
        let scoped = KgError::ErrorCodeNotFound {
            code: "E5678".to_string(),
            machine: Some("Crane".to_string()),
        };
        assert_eq!(
            scoped.to_string(),
            "Error code 'E5678' not found for machine 'Crane'."
        );

        let global = KgError::ErrorCodeNotFound {
            code: "E5678".to_string(),
            machine: None,
        };
        assert_eq!(global.to_string(), "Error code 'E5678' not found.");
    }

    #[test]
    fn serializes_with_kind_tag() {
        let json = serde_json::to_value(KgError::NoRelevantMatches).unwrap();
        assert_eq!(json["kind"], "no_relevant_matches");

        let json = serde_json::to_value(KgError::MachineNotFound {
            machine: "Crane".to_string(),
        })
        .unwrap();
        assert_eq!(json["kind"], "machine_not_found");
        assert_eq!(json["machine"], "Crane");
    }
}
