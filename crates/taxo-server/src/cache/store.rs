use std::time::Duration;

use crate::backend::{CacheBackend, DegradePolicy};
use crate::config::{CacheConfig, CacheTtlConfig, InvalidationMode};

use super::keys::{CacheKey, KeyCodec, TtlTier};

/// Keys deleted per DEL round trip.
pub(crate) const DELETE_CHUNK: usize = 500;

/// Response cache on top of the shared backend.
///
/// Nothing here returns an error: a failing backend reads as a miss, a
/// failed write is dropped, a failed delete reports zero keys.
#[derive(Debug, Clone)]
pub struct CacheStore {
    backend: CacheBackend,
    policy: DegradePolicy,
    codec: KeyCodec,
    ttl: CacheTtlConfig,
    mode: InvalidationMode,
}

impl CacheStore {
    pub fn new(
        backend: CacheBackend,
        policy: DegradePolicy,
        codec: KeyCodec,
        config: &CacheConfig,
    ) -> Self {
        Self {
            backend,
            policy,
            codec,
            ttl: config.ttl.clone(),
            mode: config.invalidation_mode,
        }
    }

    pub fn backend(&self) -> &CacheBackend {
        &self.backend
    }

    pub fn policy(&self) -> &DegradePolicy {
        &self.policy
    }

    pub fn codec(&self) -> &KeyCodec {
        &self.codec
    }

    pub fn mode(&self) -> InvalidationMode {
        self.mode
    }

    pub fn ttl_for(&self, tier: TtlTier) -> Duration {
        tier.duration(&self.ttl)
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.policy
            .guard("get", key, self.backend.get(key))
            .await
            .flatten()
    }

    pub async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) {
        self.policy
            .guard("set", key, self.backend.set_ex(key, value, ttl))
            .await;
    }

    /// Deletes every key matching `pattern` and returns how many went.
    ///
    /// Zero matches is a no-op. Keys are enumerated with SCAN and deleted in
    /// chunks, each round trip bounded by the per-call timeout.
    pub async fn delete_matching(&self, pattern: &str) -> u64 {
        let Some(keys) = self
            .policy
            .guard("scan", pattern, self.backend.scan_match(pattern))
            .await
        else {
            return 0;
        };
        self.delete_keys(&keys).await
    }

    /// Drops every cached response. Counters and index sets are left alone;
    /// index sets that point at purged keys are harmless and expire.
    pub async fn purge(&self) -> u64 {
        let deleted = self.delete_matching(&self.codec.all_responses_pattern()).await;
        tracing::info!(deleted, "response cache purged");
        deleted
    }

    pub(crate) async fn delete_keys(&self, keys: &[String]) -> u64 {
        let mut deleted = 0;
        for chunk in keys.chunks(DELETE_CHUNK) {
            let label = chunk.first().map(String::as_str).unwrap_or_default();
            deleted += self
                .policy
                .guard("del", label, self.backend.del(chunk))
                .await
                .unwrap_or(0);
        }
        deleted
    }

    /// Stores a populated response under its tier TTL.
    ///
    /// In index mode the key is registered in its index sets first; if that
    /// fails the response is not cached, since an unindexed entry could not
    /// be invalidated.
    pub async fn remember(&self, key: &CacheKey, value: &[u8]) {
        if self.mode == InvalidationMode::Index {
            let sets = self.codec.index_sets_for(key);
            let members = [key.key.clone()];
            let registered = self
                .policy
                .guard(
                    "sadd",
                    &key.key,
                    self.backend
                        .sadd_all(&sets, &members, TtlTier::longest(&self.ttl)),
                )
                .await;
            if registered.is_none() {
                return;
            }
        }
        self.set_with_ttl(&key.key, value, self.ttl_for(key.scope.tier()))
            .await;
        tracing::debug!(key = %key, "cache populated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::keys::CacheScope;

    fn store(backend: CacheBackend) -> CacheStore {
        let config = CacheConfig::default();
        CacheStore::new(
            backend,
            DegradePolicy::from_config(&config),
            KeyCodec::new("t:", false),
            &config,
        )
    }

    #[tokio::test]
    async fn remember_registers_then_stores() {
        let cache = store(CacheBackend::new_memory());
        let key = cache
            .codec()
            .cache_key(CacheScope::TagDetail, Some("berlin"), None);
        cache.remember(&key, b"payload").await;

        assert_eq!(cache.get(&key.key).await, Some(b"payload".to_vec()));
        assert_eq!(
            cache.backend().ttl(&key.key).await.unwrap(),
            CacheTtlConfig::default().entity_secs as i64
        );
        let members = cache
            .backend()
            .smembers("t:cache-index:tag:entity:berlin")
            .await
            .unwrap();
        assert_eq!(members, vec![key.key.clone()]);
    }

    #[tokio::test]
    async fn delete_matching_never_touches_counters() {
        let cache = store(CacheBackend::new_memory());
        let backend = cache.backend().clone();
        backend
            .set_ex("t:cache:tags:all:", b"a", Duration::from_secs(60))
            .await
            .unwrap();
        backend
            .set_ex("t:cache:tags:popular:", b"b", Duration::from_secs(60))
            .await
            .unwrap();
        backend.incr("t:rate-limit:api:ip:tags").await.unwrap();

        assert_eq!(cache.delete_matching("t:cache:*").await, 2);
        assert_eq!(cache.delete_matching("t:cache:*").await, 0);
        assert_eq!(backend.incr("t:rate-limit:api:ip:tags").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn purge_drops_responses_only() {
        let cache = store(CacheBackend::new_memory());
        for (scope, id) in [(CacheScope::TagList, None), (CacheScope::CategoryDetail, Some("x"))] {
            let key = cache.codec().cache_key(scope, id, None);
            cache.remember(&key, b"body").await;
        }
        cache.backend().incr("t:rate-limit:api:ip:1").await.unwrap();

        assert_eq!(cache.purge().await, 2);
        assert_eq!(cache.backend().incr("t:rate-limit:api:ip:1").await.unwrap(), 2);
        assert!(
            !cache
                .backend()
                .smembers("t:cache-index:tag:all")
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn disabled_backend_is_a_pass_through() {
        let cache = store(CacheBackend::Disabled);
        let key = cache.codec().cache_key(CacheScope::TagList, None, None);
        cache.remember(&key, b"x").await;
        assert_eq!(cache.get(&key.key).await, None);
        assert_eq!(cache.delete_matching("*").await, 0);
    }
}
