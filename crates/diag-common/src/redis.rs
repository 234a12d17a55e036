/// Redis wrapper with graceful degradation.
///
/// Every operation returns `Option<T>` or `bool`. On any Redis error the operation logs a
/// warning and reports absence/failure; callers recompute or skip caching. The service is
/// fully functional without Redis.
use std::collections::HashMap;

use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tracing::warn;

pub struct RedisCache {
    client: Option<redis::Client>,
}

impl RedisCache {
    /// A `None` URL or an unparseable one yields a cache that no-ops.
    pub fn new(url: Option<&str>) -> Self {
        let client = url.and_then(|u| {
            redis::Client::open(u)
                .inspect_err(|e| warn!(error = %e, url = u, "failed to create redis client, cache disabled"))
                .ok()
        });
        Self { client }
    }

    pub fn disabled() -> Self {
        Self { client: None }
    }

    /// PING the server.
    pub async fn is_available(&self) -> bool {
        let Some(mut conn) = self.connection().await else {
            return false;
        };
        let result: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
        result.is_ok()
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.connection().await?;
        conn.get::<_, Option<String>>(key)
            .await
            .inspect_err(|e| warn!(error = %e, key, "redis GET failed"))
            .ok()?
    }

    pub async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> bool {
        let Some(mut conn) = self.connection().await else {
            return false;
        };
        conn.set_ex::<_, _, ()>(key, value, ttl_secs)
            .await
            .inspect_err(|e| warn!(error = %e, key, "redis SETEX failed"))
            .is_ok()
    }

    /// Set one hash field and refresh the TTL of the whole hash.
    pub async fn hset_with_ttl(&self, key: &str, field: &str, value: &str, ttl_secs: u64) -> bool {
        let Some(mut conn) = self.connection().await else {
            return false;
        };
        let written = conn
            .hset::<_, _, _, ()>(key, field, value)
            .await
            .inspect_err(|e| warn!(error = %e, key, field, "redis HSET failed"))
            .is_ok();
        if !written {
            return false;
        }
        let ttl = i64::try_from(ttl_secs).unwrap_or(i64::MAX);
        conn.expire::<_, ()>(key, ttl)
            .await
            .inspect_err(|e| warn!(error = %e, key, "redis EXPIRE failed"))
            .is_ok()
    }

    pub async fn hget(&self, key: &str, field: &str) -> Option<String> {
        let mut conn = self.connection().await?;
        conn.hget::<_, _, Option<String>>(key, field)
            .await
            .inspect_err(|e| warn!(error = %e, key, field, "redis HGET failed"))
            .ok()?
    }

    pub async fn hgetall(&self, key: &str) -> Option<HashMap<String, String>> {
        let mut conn = self.connection().await?;
        conn.hgetall::<_, HashMap<String, String>>(key)
            .await
            .inspect_err(|e| warn!(error = %e, key, "redis HGETALL failed"))
            .ok()
    }

    async fn connection(&self) -> Option<MultiplexedConnection> {
        let client = self.client.as_ref()?;
        client
            .get_multiplexed_async_connection()
            .await
            .inspect_err(|e| warn!(error = %e, "redis connection failed"))
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::RedisCache;

    #[tokio::test]
    async fn disabled_cache_degrades_to_misses() {
        let cache = RedisCache::disabled();
        assert!(!cache.is_available().await);
        assert!(cache.get("k").await.is_none());
        assert!(!cache.set_with_ttl("k", "v", 10).await);
        assert!(!cache.hset_with_ttl("h", "f", "v", 10).await);
        assert!(cache.hgetall("h").await.is_none());
    }

    #[tokio::test]
    async fn unparseable_url_disables_cache() {
        let cache = RedisCache::new(Some("definitely not a redis url"));
        assert!(!cache.is_available().await);
    }
}
