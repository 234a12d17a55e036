/// Relevance ranking of catalog candidates, delegated to an external agent.
///
/// The ranker is untrusted: its reply may be wrapped in Markdown fences, carry prose, be
/// truncated, or name codes that were never offered. This module only turns the reply
/// into `(id, score)` pairs; deciding which pairs are valid happens in `search`.
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::KgError;
use diag_common::agent::AgentChat;

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:json|JSON)?[ \t]*\n|\n?```").expect("valid regex"));

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct RankerError(pub String);

#[async_trait]
pub trait Ranker: Send + Sync {
    /// Rank the candidates embedded in `query`; returns the raw reply text.
    async fn rank(&self, query: &str, session_id: &str) -> Result<String, RankerError>;
}

/// Ranks through the knowledge-graph agent.
pub struct AgentRanker {
    agent: Arc<dyn AgentChat>,
    agent_id: String,
}

impl AgentRanker {
    pub fn new(agent: Arc<dyn AgentChat>, agent_id: impl Into<String>) -> Self {
        Self {
            agent,
            agent_id: agent_id.into(),
        }
    }
}

#[async_trait]
impl Ranker for AgentRanker {
    async fn rank(&self, query: &str, session_id: &str) -> Result<String, RankerError> {
        self.agent
            .chat(&self.agent_id, session_id, query)
            .await
            .map_err(|e| RankerError(e.to_string()))
    }
}

/// One `{id, score}` item of a ranker reply. This is also what the search cache stores,
/// so cached rankings are rehydrated against the current catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankEntry {
    pub id: String,
    /// Clamped to [0, 100]; `None` when absent or not a number.
    pub score: Option<f64>,
}

/// Strip code fences and parse `{"results": [{"id": ..., "score": ...}]}`.
///
/// Items that are not objects with a string `id` are skipped with a warning.
pub fn parse_ranking(raw: &str) -> Result<Vec<RankEntry>, KgError> {
    let cleaned = strip_code_fences(raw.trim());

    let value: Value = serde_json::from_str(cleaned.trim()).map_err(|_| {
        KgError::RankerMalformedResponse {
            raw: cleaned.clone(),
        }
    })?;

    let Some(items) = value.get("results").and_then(Value::as_array) else {
        return Err(KgError::RankerUnexpectedShape {
            shape: value.to_string(),
        });
    };

    let mut entries = Vec::with_capacity(items.len());
    for item in items {
        let Some(id) = item.get("id").and_then(Value::as_str) else {
            warn!(item = %item, "ignoring ranker item without a string id");
            continue;
        };
        let score = item.get("score").and_then(Value::as_f64).map(|s| {
            if !(0.0..=100.0).contains(&s) {
                warn!(id, score = s, "ranker score out of range, clamping");
            }
            s.clamp(0.0, 100.0)
        });
        entries.push(RankEntry {
            id: id.to_string(),
            score,
        });
    }
    Ok(entries)
}

fn strip_code_fences(text: &str) -> String {
    CODE_FENCE.replace_all(text, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json() {
        let entries =
            parse_ranking(r#"{"results":[{"id":"H1234","score":90},{"id":"ZZZZ","score":50}]}"#)
                .unwrap();
        assert_eq!(
            entries,
            vec![
                RankEntry {
                    id: "H1234".to_string(),
                    score: Some(90.0)
                },
                RankEntry {
                    id: "ZZZZ".to_string(),
                    score: Some(50.0)
                },
            ]
        );
    }

    #[test]
    fn strips_json_code_fences() {
        let raw = "```json\n{\"results\": [{\"id\": \"E5678\", \"score\": 72.5}]}\n```";
        let entries = parse_ranking(raw).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].score, Some(72.5));

        let bare = "  ```\n{\"results\": []}\n```  ";
        assert_eq!(parse_ranking(bare).unwrap(), vec![]);
    }

    #[test]
    fn refusal_text_is_malformed() {
        assert_eq!(
            parse_ranking("I cannot comply"),
            Err(KgError::RankerMalformedResponse {
                raw: "I cannot comply".to_string()
            })
        );
    }

    #[test]
    fn truncated_json_is_malformed() {
        let err = parse_ranking(r#"{"results":[{"id":"H1234","sco"#).unwrap_err();
        assert!(matches!(err, KgError::RankerMalformedResponse { raw } if raw.contains("H1234")));
    }

    #[test]
    fn missing_results_key_reports_shape() {
        let err = parse_ranking(r#"{"matches":[{"id":"H1234"}]}"#).unwrap_err();
        match err {
            KgError::RankerUnexpectedShape { shape } => assert!(shape.contains("matches")),
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(matches!(
            parse_ranking(r#"[{"id":"H1234","score":10}]"#),
            Err(KgError::RankerUnexpectedShape { .. })
        ));
        assert!(matches!(
            parse_ranking(r#"{"results":"H1234"}"#),
            Err(KgError::RankerUnexpectedShape { .. })
        ));
    }

    #[test]
    fn skips_items_without_string_id_and_clamps_scores() {
        let entries = parse_ranking(
            r#"{"results":[{"score":80},{"id":42,"score":70},{"id":"M8910","score":140},{"id":"H9012"}]}"#,
        )
        .unwrap();
        assert_eq!(
            entries,
            vec![
                RankEntry {
                    id: "M8910".to_string(),
                    score: Some(100.0)
                },
                RankEntry {
                    id: "H9012".to_string(),
                    score: None
                },
            ]
        );
    }

    #[test]
    fn fence_pattern_is_compiled_once() {
        let first: *const Regex = &*CODE_FENCE;
        for raw in ["```json\n{\"results\":[]}\n```", "```\n{\"results\":[]}\n```"] {
            assert_eq!(parse_ranking(raw).unwrap(), vec![]);
        }
        assert!(std::ptr::eq(first, &*CODE_FENCE));
    }
}
