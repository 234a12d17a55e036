use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::DiagnosticCache;
use crate::error::KgError;
use crate::graph::ErrorGraph;
use crate::model::{RankedResult, SearchCandidate};
use crate::ranker::{parse_ranking, RankEntry, Ranker};

/// How many results the orchestration layer consumes from a symptom search.
pub const DEFAULT_TOP_K: usize = 3;

pub struct SymptomSearch {
    graph: Arc<ErrorGraph>,
    ranker: Arc<dyn Ranker>,
    cache: Arc<DiagnosticCache>,
}

impl SymptomSearch {
    pub fn new(graph: Arc<ErrorGraph>, ranker: Arc<dyn Ranker>, cache: Arc<DiagnosticCache>) -> Self {
        Self {
            graph,
            ranker,
            cache,
        }
    }

    pub fn graph(&self) -> &ErrorGraph {
        &self.graph
    }

    /// Rank every error of `machine_name` against a free-text symptom description.
    ///
    /// Every returned result is a catalog entry of the requested machine, in ranker order.
    /// The ranker is not called when the machine has no errors or a cached ranking exists.
    pub async fn search_by_symptom(
        &self,
        machine_name: &str,
        symptoms: &str,
        session_id: &str,
    ) -> Result<Vec<RankedResult>, KgError> {
        let machine_code = self.graph.resolve_machine(machine_name)?;

        let candidates = self.graph.candidates(machine_code);
        if candidates.is_empty() {
            return Err(KgError::EmptyCatalogForMachine {
                machine: machine_name.to_string(),
            });
        }

        let (entries, fresh) = match self.cache.get_search_ranking(machine_code, symptoms).await {
            Some(cached) => {
                info!(machine = machine_code, "symptom search cache hit");
                (cached, false)
            }
            None => {
                let query = build_ranking_query(symptoms, &candidates);
                let raw = self
                    .ranker
                    .rank(&query, session_id)
                    .await
                    .map_err(|e| KgError::RankerCallFailed {
                        message: e.to_string(),
                    })?;
                (parse_ranking(&raw)?, true)
            }
        };

        // Cached or fresh, results come from the live catalog.
        let results = reconcile(&self.graph, machine_code, &entries)?;
        info!(
            machine = machine_code,
            ranked = entries.len(),
            kept = results.len(),
            "symptom search complete"
        );

        if fresh {
            self.cache
                .set_search_ranking(machine_code, symptoms, &entries)
                .await;
        }
        Ok(results)
    }

    /// The top `limit` results of [`Self::search_by_symptom`].
    pub async fn extract_steps(
        &self,
        machine_name: &str,
        symptoms: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<RankedResult>, KgError> {
        let mut results = self
            .search_by_symptom(machine_name, symptoms, session_id)
            .await?;
        results.truncate(limit);
        Ok(results)
    }
}

pub fn build_ranking_query(symptoms: &str, candidates: &[SearchCandidate]) -> String {
    let mut prompt = format!(
        "Given the search text: '{symptoms}', rank the following errors by relevance (0-100). "
    );
    for candidate in candidates {
        prompt.push_str(&format!("- {}: {}\n", candidate.id, candidate.text));
    }
    prompt.push_str(
        "\nReturn JSON in the format: {\"results\": [{\"id\": \"H1234\", \"score\": 85}]}. \
         Only use the error codes provided.",
    );
    prompt
}

/// Keep ranker entries that name an error of `machine_code`, rehydrated from the catalog.
///
/// Unknown and repeated ids are dropped with a warning. A score of 0 or a missing score
/// leaves `similarity` unset.
fn reconcile(
    graph: &ErrorGraph,
    machine_code: &str,
    entries: &[RankEntry],
) -> Result<Vec<RankedResult>, KgError> {
    let mut seen = HashSet::new();
    let mut results = Vec::new();

    for entry in entries {
        if !graph.has_error(machine_code, &entry.id) {
            warn!(
                code = %entry.id,
                machine = machine_code,
                "ignoring unexpected error code from ranker"
            );
            continue;
        }
        if !seen.insert(entry.id.as_str()) {
            warn!(code = %entry.id, "ignoring repeated error code from ranker");
            continue;
        }

        let similarity = entry.score.filter(|s| *s > 0.0).map(|s| s / 100.0);
        match graph.get_details(&entry.id, similarity) {
            Ok(details) => results.push(details),
            Err(e) => warn!(code = %entry.id, error = %e, "ranked code missing from catalog"),
        }
    }

    if results.is_empty() {
        return Err(KgError::NoRelevantMatches);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::catalog::builtin_catalog;
    use crate::model::MachineType;
    use crate::ranker::RankerError;
    use diag_common::redis::RedisCache;

    /// Replies with a fixed text (or failure) and records what it was asked.
    struct ScriptedRanker {
        reply: Result<String, String>,
        calls: AtomicUsize,
        last_query: Mutex<Option<String>>,
    }

    impl ScriptedRanker {
        fn replying(text: &str) -> Self {
            Self {
                reply: Ok(text.to_string()),
                calls: AtomicUsize::new(0),
                last_query: Mutex::new(None),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                reply: Err(message.to_string()),
                calls: AtomicUsize::new(0),
                last_query: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl Ranker for ScriptedRanker {
        async fn rank(&self, query: &str, _session_id: &str) -> Result<String, RankerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_query.lock().unwrap() = Some(query.to_string());
            self.reply.clone().map_err(RankerError)
        }
    }

    fn catalog_with_empty_machine() -> Vec<MachineType> {
        let mut catalog = builtin_catalog();
        catalog.push(MachineType {
            code: "CR".to_string(),
            name: "Crawler".to_string(),
            aliases: vec![],
            errors: vec![],
        });
        catalog
    }

    fn search_with(ranker: Arc<ScriptedRanker>) -> SymptomSearch {
        SymptomSearch::new(
            Arc::new(ErrorGraph::new(catalog_with_empty_machine())),
            ranker,
            Arc::new(DiagnosticCache::new(RedisCache::disabled(), 60)),
        )
    }

    #[tokio::test]
    async fn drops_codes_outside_the_machine() {
        let ranker = Arc::new(ScriptedRanker::replying(
            r#"{"results":[{"id":"H1234","score":90},{"id":"ZZZZ","score":50}]}"#,
        ));
        let search = search_with(Arc::clone(&ranker));

        let results = search
            .search_by_symptom("Excavator", "arm moves slowly", "s1")
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].code, "H1234");
        assert_eq!(results[0].description, "Hydraulic Pressure Too Low");
        assert_eq!(results[0].similarity, Some(0.9));
    }

    #[tokio::test]
    async fn unparseable_reply_is_a_malformed_response() {
        let search = search_with(Arc::new(ScriptedRanker::replying("I cannot comply")));
        let err = search
            .search_by_symptom("Excavator", "smoke", "s1")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            KgError::RankerMalformedResponse {
                raw: "I cannot comply".to_string()
            }
        );
    }

    #[tokio::test]
    async fn empty_machine_never_calls_the_ranker() {
        let ranker = Arc::new(ScriptedRanker::replying(r#"{"results":[]}"#));
        let search = search_with(Arc::clone(&ranker));
        let err = search
            .search_by_symptom("crawler", "anything", "s1")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            KgError::EmptyCatalogForMachine {
                machine: "crawler".to_string()
            }
        );
        assert_eq!(ranker.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_machine_never_calls_the_ranker() {
        let ranker = Arc::new(ScriptedRanker::replying(r#"{"results":[]}"#));
        let search = search_with(Arc::clone(&ranker));
        assert!(matches!(
            search.search_by_symptom("Crane", "anything", "s1").await,
            Err(KgError::MachineNotFound { .. })
        ));
        assert_eq!(ranker.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn only_hallucinated_codes_means_no_relevant_matches() {
        let search = search_with(Arc::new(ScriptedRanker::replying(
            r#"{"results":[{"id":"ZZZZ","score":99},{"id":"X0000","score":40}]}"#,
        )));
        assert_eq!(
            search.search_by_symptom("digger", "noise", "s1").await,
            Err(KgError::NoRelevantMatches)
        );
    }

    #[tokio::test]
    async fn ranker_failure_is_distinct_from_no_match() {
        let search = search_with(Arc::new(ScriptedRanker::failing("connection refused")));
        assert_eq!(
            search.search_by_symptom("digger", "noise", "s1").await,
            Err(KgError::RankerCallFailed {
                message: "connection refused".to_string()
            })
        );
    }

    #[tokio::test]
    async fn missing_results_key_is_unexpected_shape() {
        let search = search_with(Arc::new(ScriptedRanker::replying(r#"{"ranking":[]}"#)));
        assert!(matches!(
            search.search_by_symptom("digger", "noise", "s1").await,
            Err(KgError::RankerUnexpectedShape { .. })
        ));
    }

    #[tokio::test]
    async fn valid_codes_round_trip_with_scaled_similarity_in_ranker_order() {
        let search = search_with(Arc::new(ScriptedRanker::replying(
            "```json\n{\"results\":[{\"id\":\"M8910\",\"score\":85},{\"id\":\"E5678\",\"score\":40},\
             {\"id\":\"H9012\",\"score\":0},{\"id\":\"M8910\",\"score\":10}]}\n```",
        )));
        let results = search
            .search_by_symptom("EX machine", "vibration and power loss", "s1")
            .await
            .unwrap();

        let codes: Vec<&str> = results.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, vec!["M8910", "E5678", "H9012"]);
        assert_eq!(results[0].similarity, Some(0.85));
        assert_eq!(results[1].similarity, Some(0.4));
        assert_eq!(results[2].similarity, None);

        let graph = search.graph();
        let ex = graph.resolve_machine("Excavator").unwrap();
        assert!(results.iter().all(|r| graph.has_error(ex, &r.code)));
    }

    #[tokio::test]
    async fn ranker_echoed_text_is_never_trusted() {
        let search = search_with(Arc::new(ScriptedRanker::replying(
            r#"{"results":[{"id":"E5678","score":70,"description":"Fuel leak","steps":["Ignore it"]}]}"#,
        )));
        let results = search.search_by_symptom("digger", "hot", "s1").await.unwrap();
        assert_eq!(results[0].description, "Engine Overheating");
        assert_eq!(results[0].steps[0], "Inspect Coolant Levels");
    }

    #[tokio::test]
    async fn query_embeds_symptoms_and_every_candidate() {
        let ranker = Arc::new(ScriptedRanker::replying(r#"{"results":[{"id":"H1234","score":5}]}"#));
        let search = search_with(Arc::clone(&ranker));
        search
            .search_by_symptom("digger", "boom drops under load", "s1")
            .await
            .unwrap();

        let query = ranker.last_query.lock().unwrap().clone().unwrap();
        assert!(query.starts_with("Given the search text: 'boom drops under load'"));
        for code in ["H1234", "E5678", "M8910", "H9012"] {
            assert!(query.contains(&format!("- {code}: ")), "{code}");
        }
    }

    #[tokio::test]
    async fn extract_steps_keeps_the_top_three() {
        let search = search_with(Arc::new(ScriptedRanker::replying(
            r#"{"results":[{"id":"H9012","score":95},{"id":"H1234","score":90},{"id":"M8910","score":30},{"id":"E5678","score":10}]}"#,
        )));
        let results = search
            .extract_steps("Excavator", "cylinder leaking", "s1", DEFAULT_TOP_K)
            .await
            .unwrap();
        let codes: Vec<&str> = results.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, vec!["H9012", "H1234", "M8910"]);
    }

    /// The built-in catalog with H1234 reworded and H9012 removed.
    fn revised_catalog() -> Vec<MachineType> {
        let mut catalog = builtin_catalog();
        let excavator = &mut catalog[0];
        excavator.errors.retain(|e| e.code != "H9012");
        let h1234 = excavator
            .errors
            .iter_mut()
            .find(|e| e.code == "H1234")
            .unwrap();
        h1234.description = "Hydraulic Pump Wear".to_string();
        h1234.steps = vec!["Replace the hydraulic pump".to_string()];
        catalog
    }

    fn search_over(catalog: Vec<MachineType>, ranker: Arc<ScriptedRanker>) -> (SymptomSearch, Arc<DiagnosticCache>) {
        let cache = Arc::new(DiagnosticCache::new(RedisCache::disabled(), 60));
        let search = SymptomSearch::new(Arc::new(ErrorGraph::new(catalog)), ranker, Arc::clone(&cache));
        (search, cache)
    }

    #[tokio::test]
    async fn cached_ranking_is_rehydrated_from_the_live_catalog() {
        let ranker = Arc::new(ScriptedRanker::replying(r#"{"results":[]}"#));
        let (search, cache) = search_over(revised_catalog(), Arc::clone(&ranker));
        // written by an instance whose catalog still had H9012
        cache.seed_ranking(
            "EX",
            "slow boom",
            r#"[{"id":"H9012","score":95.0},{"id":"H1234","score":80.0},{"id":"ZZZZ","score":70.0}]"#,
        );

        let results = search
            .search_by_symptom("digger", "slow boom", "s1")
            .await
            .unwrap();

        assert_eq!(ranker.calls.load(Ordering::SeqCst), 0);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].code, "H1234");
        assert_eq!(results[0].description, "Hydraulic Pump Wear");
        assert_eq!(results[0].steps, vec!["Replace the hydraulic pump".to_string()]);
        assert_eq!(results[0].similarity, Some(0.8));
    }

    #[tokio::test]
    async fn cached_ranking_of_foreign_codes_yields_no_matches() {
        let ranker = Arc::new(ScriptedRanker::replying(r#"{"results":[]}"#));
        let (search, cache) = search_over(revised_catalog(), Arc::clone(&ranker));
        cache.seed_ranking("EX", "weeping seal", r#"[{"id":"H9012","score":95.0}]"#);

        assert_eq!(
            search
                .search_by_symptom("Excavator", "weeping seal", "s1")
                .await,
            Err(KgError::NoRelevantMatches)
        );
        assert_eq!(ranker.calls.load(Ordering::SeqCst), 0);
    }
}
