/// Caching layer for the troubleshooter.
///
/// Search rankings go to Redis only. Session analyses go to Redis; a field is kept in the
/// in-process map only when Redis did not take the write, and local sessions expire after
/// the same TTL as the Redis hash.
///
/// Key schema:
/// - `tsh:v1:session:{session_id}`: hash of step field -> output (TTL `SESSION_TTL_SECS`)
/// - `tsh:v1:ranking:{sha256(machine|query)}`: JSON Vec<RankEntry> (TTL 3600s)
///
/// Rankings hold only `(id, score)`. Callers rehydrate them against the live catalog, so a
/// ranking written by an instance with another catalog never leaks its entries.
use std::collections::HashMap;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::ranker::RankEntry;
use diag_common::redis::RedisCache;

const KEY_PREFIX: &str = "tsh:v1:";
const RANKING_TTL_SECS: u64 = 3600;
pub const ISSUE_FIELD: &str = "issue_description";

/// Session fields Redis did not accept, refreshed on every write like the Redis EXPIRE.
struct LocalSession {
    touched: Instant,
    fields: HashMap<String, String>,
}

pub struct DiagnosticCache {
    redis: RedisCache,
    session_ttl: Duration,
    local_sessions: RwLock<HashMap<String, LocalSession>>,
    #[cfg(test)]
    seeded_rankings: std::sync::Mutex<HashMap<String, String>>,
}

impl DiagnosticCache {
    pub fn new(redis: RedisCache, session_ttl_secs: u64) -> Self {
        Self {
            redis,
            session_ttl: Duration::from_secs(session_ttl_secs),
            local_sessions: RwLock::new(HashMap::new()),
            #[cfg(test)]
            seeded_rankings: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_search_ranking(&self, machine_code: &str, query: &str) -> Option<Vec<RankEntry>> {
        let key = ranking_key(machine_code, query);
        let json = match self.redis.get(&key).await {
            Some(json) => json,
            None => self.seeded_ranking(&key)?,
        };
        serde_json::from_str(&json)
            .inspect_err(|e| warn!(error = %e, key, "cache deserialization failed"))
            .ok()
    }

    pub async fn set_search_ranking(&self, machine_code: &str, query: &str, entries: &[RankEntry]) {
        let key = ranking_key(machine_code, query);
        if let Ok(json) = serde_json::to_string(entries) {
            self.redis.set_with_ttl(&key, &json, RANKING_TTL_SECS).await;
        }
    }

    pub async fn set_session_field(&self, session_id: &str, field: &str, value: &str) {
        let key = session_key(session_id);
        let ttl_secs = self.session_ttl.as_secs();
        if self.redis.hset_with_ttl(&key, field, value, ttl_secs).await {
            return;
        }

        let mut sessions = self.local_sessions.write().await;
        self.evict_expired(&mut sessions);
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| LocalSession {
                touched: Instant::now(),
                fields: HashMap::new(),
            });
        session.touched = Instant::now();
        session.fields.insert(field.to_string(), value.to_string());
    }

    pub async fn get_session_field(&self, session_id: &str, field: &str) -> Option<String> {
        if let Some(value) = self.redis.hget(&session_key(session_id), field).await {
            return Some(value);
        }
        self.local_session(session_id)
            .await
            .and_then(|mut fields| fields.remove(field))
    }

    /// Every stored field of a session, Redis values taking precedence over local ones.
    pub async fn get_session(&self, session_id: &str) -> HashMap<String, String> {
        let mut fields = self.local_session(session_id).await.unwrap_or_default();
        if let Some(remote) = self.redis.hgetall(&session_key(session_id)).await {
            fields.extend(remote);
        }
        fields
    }

    /// Live local fields of a session; an expired session is removed.
    async fn local_session(&self, session_id: &str) -> Option<HashMap<String, String>> {
        {
            let sessions = self.local_sessions.read().await;
            match sessions.get(session_id) {
                None => return None,
                Some(s) if !self.is_expired(s) => return Some(s.fields.clone()),
                Some(_) => {}
            }
        }
        let mut sessions = self.local_sessions.write().await;
        if sessions.get(session_id).is_some_and(|s| self.is_expired(s)) {
            sessions.remove(session_id);
            debug!(session_id, "local session expired");
        }
        None
    }

    fn is_expired(&self, session: &LocalSession) -> bool {
        session.touched.elapsed() >= self.session_ttl
    }

    fn evict_expired(&self, sessions: &mut HashMap<String, LocalSession>) {
        let before = sessions.len();
        sessions.retain(|_, s| !self.is_expired(s));
        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!(evicted, "evicted expired local sessions");
        }
    }

    #[cfg(test)]
    fn seeded_ranking(&self, key: &str) -> Option<String> {
        self.seeded_rankings.lock().unwrap().get(key).cloned()
    }

    #[cfg(not(test))]
    fn seeded_ranking(&self, _key: &str) -> Option<String> {
        None
    }

    /// Make `get_search_ranking` return `json` as if another instance had cached it.
    #[cfg(test)]
    pub(crate) fn seed_ranking(&self, machine_code: &str, query: &str, json: &str) {
        self.seeded_rankings
            .lock()
            .unwrap()
            .insert(ranking_key(machine_code, query), json.to_string());
    }
}

fn session_key(session_id: &str) -> String {
    format!("{KEY_PREFIX}session:{session_id}")
}

fn ranking_key(machine_code: &str, query: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(machine_code.as_bytes());
    hasher.update(b"|");
    hasher.update(query.as_bytes());
    format!("{KEY_PREFIX}ranking:{:x}", hasher.finalize())
}
