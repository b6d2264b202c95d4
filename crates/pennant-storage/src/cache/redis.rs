//! Redis write-through cache for evaluation results.

use redis::{aio::ConnectionManager, AsyncCommands, Client};

use pennant_core::{
    flag_cache_key, list_cache_key, Evaluation, EvaluationId, EvaluationList, FlagId, FlagKey,
    CACHE_KEY_PATTERN,
};

use crate::error::{StorageError, StorageResult};
use crate::traits::{EvaluationRepository, EvaluationResults};

/// Configuration for the Redis evaluation cache.
#[derive(Debug, Clone)]
pub struct RedisCacheConfig {
    /// Redis connection URL.
    pub url: String,
    /// TTL applied to every cached entry, in seconds.
    pub ttl_secs: u64,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            ttl_secs: 3600, // 1 hour
        }
    }
}

impl RedisCacheConfig {
    /// Creates a new Redis cache configuration.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Sets the entry TTL.
    pub fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }
}

/// A write-through cache decorating a durable [`EvaluationRepository`].
///
/// Evaluations are cached under `eval:<reqHash>:<flagKey>` and full
/// evaluate-all batches under `eval:<reqHash>`; the two key families are
/// maintained independently. Mutations invalidate with a coarse `eval:*`
/// scan, which is acceptable because mutations are rare relative to reads.
#[derive(Clone)]
pub struct RedisEvaluationCache<S> {
    conn: ConnectionManager,
    store: S,
    config: RedisCacheConfig,
}

impl<S> std::fmt::Debug for RedisEvaluationCache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisEvaluationCache")
            .field("config", &self.config)
            .finish()
    }
}

impl<S> RedisEvaluationCache<S> {
    /// Connects to Redis and wraps the given store.
    pub async fn connect(config: RedisCacheConfig, store: S) -> StorageResult<Self> {
        let client = Client::open(config.url.as_str()).map_err(|e| {
            StorageError::Configuration(format!("Failed to create Redis client: {e}"))
        })?;

        let conn = ConnectionManager::new(client).await?;

        Ok(Self {
            conn,
            store,
            config,
        })
    }

    /// Checks if Redis is healthy.
    pub async fn is_healthy(&self) -> bool {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }

    async fn write_through(&self, key: &str, payload: String) -> StorageResult<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, payload, self.config.ttl_secs)
            .await?;
        Ok(())
    }

    /// Drops every evaluation key. O(keys) in cache size, acceptable given
    /// how rarely mutations run. Admin surfaces call this after flag edits
    /// so that cached evaluations do not outlive the flag version they were
    /// computed against.
    pub async fn invalidate_all(&self) -> StorageResult<()> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(CACHE_KEY_PATTERN)
            .query_async(&mut conn)
            .await?;

        if !keys.is_empty() {
            conn.del::<_, ()>(keys).await?;
        }
        Ok(())
    }
}

impl<S: EvaluationRepository> EvaluationRepository for RedisEvaluationCache<S> {
    async fn find_all_by_user_id(
        &self,
        user_id: &str,
        search: Option<&str>,
        offset: Option<i64>,
        limit: Option<i64>,
    ) -> StorageResult<EvaluationResults> {
        // Admin-path listing; served straight from the store.
        self.store
            .find_all_by_user_id(user_id, search, offset, limit)
            .await
    }

    async fn find_by_user_id_and_flag_id(
        &self,
        user_id: &str,
        flag_id: FlagId,
    ) -> StorageResult<Option<Evaluation>> {
        self.store
            .find_by_user_id_and_flag_id(user_id, flag_id)
            .await
    }

    async fn find_by_req_hash_and_flag_key(
        &self,
        req_hash: &str,
        flag_key: &FlagKey,
    ) -> StorageResult<Option<Evaluation>> {
        let key = flag_cache_key(req_hash, flag_key);
        let mut conn = self.conn.clone();

        let cached: Option<String> = conn.get(&key).await?;
        if let Some(payload) = cached {
            match serde_json::from_str(&payload) {
                Ok(eval) => return Ok(Some(eval)),
                Err(err) => {
                    tracing::warn!(%key, error = %err, "discarding undecodable cache entry")
                }
            }
        }

        let Some(eval) = self
            .store
            .find_by_req_hash_and_flag_key(req_hash, flag_key)
            .await?
        else {
            return Ok(None);
        };

        self.write_through(&key, serde_json::to_string(&eval)?).await?;
        Ok(Some(eval))
    }

    async fn find_all_by_req_hash(&self, req_hash: &str) -> StorageResult<Option<EvaluationList>> {
        let key = list_cache_key(req_hash);
        let mut conn = self.conn.clone();

        let cached: Option<String> = conn.get(&key).await?;
        if let Some(payload) = cached {
            match serde_json::from_str(&payload) {
                Ok(evals) => return Ok(Some(evals)),
                Err(err) => {
                    tracing::warn!(%key, error = %err, "discarding undecodable cache entry")
                }
            }
        }

        let Some(evals) = self.store.find_all_by_req_hash(req_hash).await? else {
            return Ok(None);
        };

        self.write_through(&key, serde_json::to_string(&evals)?).await?;
        Ok(Some(evals))
    }

    async fn replace_one(&self, user_id: &str, eval: &Evaluation) -> StorageResult<()> {
        self.store.replace_one(user_id, eval).await?;

        let key = flag_cache_key(&eval.request_hash, &eval.flag_key);
        self.write_through(&key, serde_json::to_string(eval)?).await
    }

    async fn replace_all(
        &self,
        user_id: &str,
        req_hash: &str,
        evals: &EvaluationList,
    ) -> StorageResult<()> {
        self.store.replace_all(user_id, req_hash, evals).await?;

        let key = list_cache_key(req_hash);
        self.write_through(&key, serde_json::to_string(evals)?).await
    }

    async fn delete_all_by_user_id(&self, user_id: &str) -> StorageResult<()> {
        self.store.delete_all_by_user_id(user_id).await?;
        self.invalidate_all().await
    }

    async fn delete_by_id(&self, id: EvaluationId) -> StorageResult<()> {
        self.store.delete_by_id(id).await?;
        self.invalidate_all().await
    }
}
