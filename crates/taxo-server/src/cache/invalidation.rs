use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::config::InvalidationMode;

use super::keys::EntityClass;
use super::store::{CacheStore, DELETE_CHUNK};

/// Evicts cached responses after a successful write.
///
/// Called by the write handlers before they respond. The whole eviction is
/// bounded by `timeout`; failures and timeouts are logged and otherwise
/// ignored, so a slow backend never slows a write down by more than that.
#[derive(Debug, Clone)]
pub struct InvalidationHook {
    store: Arc<CacheStore>,
    timeout: Duration,
}

impl InvalidationHook {
    pub fn new(store: Arc<CacheStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Evicts every cached response depending on `class`, or on the entity
    /// `id` of that class plus every list of that class.
    ///
    /// Idempotent: a repeated call finds nothing left and returns 0.
    pub async fn invalidate(&self, class: EntityClass, id: Option<&str>) -> u64 {
        let work = async {
            match self.store.mode() {
                InvalidationMode::Index => self.evict_indexed(class, id).await,
                InvalidationMode::Scan => self.evict_scanned(class, id).await,
            }
        };
        match tokio::time::timeout(self.timeout, work).await {
            Ok(count) => {
                tracing::debug!(class = %class, id = ?id, count, "cache invalidated");
                crate::metrics::record_invalidated_keys(class.as_str(), count);
                count
            }
            Err(_) => {
                tracing::warn!(
                    class = %class,
                    id = ?id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "cache invalidation timed out"
                );
                crate::metrics::record_backend_error("invalidate");
                0
            }
        }
    }

    async fn evict_indexed(&self, class: EntityClass, id: Option<&str>) -> u64 {
        let backend = self.store.backend();
        let policy = self.store.policy();
        let sets = self.store.codec().invalidation_sets(class, id);

        let mut read = Vec::with_capacity(sets.len());
        let mut keys = BTreeSet::new();
        for set in sets {
            if let Some(members) = policy.guard("smembers", &set, backend.smembers(&set)).await {
                keys.extend(members.iter().cloned());
                read.push((set, members));
            }
        }
        let keys: Vec<String> = keys.into_iter().collect();
        let deleted = self.store.delete_keys(&keys).await;

        // Only the members read above are removed; a key registered
        // concurrently stays indexed.
        for (set, members) in &read {
            policy
                .guard("srem", set, backend.srem(set, members))
                .await;
        }
        if keys.is_empty() {
            return deleted;
        }
        // Evicted keys are also listed in the shared sets of every class
        // they depend on. Without this those sets only shrink on a
        // class-wide eviction.
        for set in self.store.codec().shared_index_sets() {
            if read.iter().any(|(done, _)| *done == set) {
                continue;
            }
            for chunk in keys.chunks(DELETE_CHUNK) {
                policy
                    .guard("srem", &set, backend.srem(&set, chunk))
                    .await;
            }
        }
        deleted
    }

    async fn evict_scanned(&self, class: EntityClass, id: Option<&str>) -> u64 {
        let mut deleted = 0;
        for pattern in self.store.codec().invalidation_patterns(class, id) {
            deleted += self.store.delete_matching(&pattern).await;
        }
        deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CacheBackend, DegradePolicy};
    use crate::cache::keys::{CacheScope, KeyCodec};
    use crate::config::CacheConfig;

    fn hook(mode: InvalidationMode) -> (InvalidationHook, Arc<CacheStore>) {
        let config = CacheConfig {
            invalidation_mode: mode,
            ..CacheConfig::default()
        };
        let store = Arc::new(CacheStore::new(
            CacheBackend::new_memory(),
            DegradePolicy::from_config(&config),
            KeyCodec::new("t:", false),
            &config,
        ));
        (
            InvalidationHook::new(store.clone(), Duration::from_millis(500)),
            store,
        )
    }

    async fn populate(store: &CacheStore, scope: CacheScope, id: Option<&str>, query: Option<&str>) -> String {
        let key = store.codec().cache_key(scope, id, query);
        store.remember(&key, b"{}").await;
        key.key
    }

    async fn scenario(mode: InvalidationMode) {
        let (hook, store) = hook(mode);
        let list = populate(&store, CacheScope::TagList, None, Some("category=geography-timing")).await;
        let berlin = populate(&store, CacheScope::TagDetail, Some("berlin"), None).await;
        let paris = populate(&store, CacheScope::TagDetail, Some("paris"), None).await;
        let category = populate(&store, CacheScope::CategoryDetail, Some("geography"), None).await;
        let subcats = populate(&store, CacheScope::Subcategories, Some("geography"), None).await;

        let evicted = hook.invalidate(EntityClass::Tag, Some("berlin")).await;
        assert_eq!(evicted, 4);
        assert_eq!(store.get(&list).await, None);
        assert_eq!(store.get(&berlin).await, None);
        // Tag details embed related tags; the category detail a tag count.
        assert_eq!(store.get(&paris).await, None);
        assert_eq!(store.get(&category).await, None);
        assert!(store.get(&subcats).await.is_some());

        assert_eq!(hook.invalidate(EntityClass::Tag, Some("berlin")).await, 0);

        let paris = populate(&store, CacheScope::TagDetail, Some("paris"), None).await;
        assert_eq!(hook.invalidate(EntityClass::Tag, None).await, 1);
        assert_eq!(store.get(&paris).await, None);

        assert_eq!(hook.invalidate(EntityClass::Category, None).await, 1);
        assert_eq!(store.get(&subcats).await, None);
        assert_eq!(hook.invalidate(EntityClass::Category, None).await, 0);
    }

    #[tokio::test]
    async fn indexed_invalidation_evicts_dependents() {
        scenario(InvalidationMode::Index).await;
    }

    #[tokio::test]
    async fn scanned_invalidation_evicts_dependents() {
        scenario(InvalidationMode::Scan).await;
    }

    #[tokio::test]
    async fn indexed_invalidation_prunes_index_sets() {
        let (hook, store) = hook(InvalidationMode::Index);
        populate(&store, CacheScope::TagDetail, Some("berlin"), None).await;
        hook.invalidate(EntityClass::Tag, Some("berlin")).await;
        let backend = store.backend();
        assert!(backend.smembers("t:cache-index:tag:entity:berlin").await.unwrap().is_empty());
        assert!(backend.smembers("t:cache-index:tag:all").await.unwrap().is_empty());
        assert_eq!(hook.invalidate(EntityClass::Tag, None).await, 0);
    }

    #[tokio::test]
    async fn class_wide_sets_do_not_accumulate_evicted_keys() {
        let (hook, store) = hook(InvalidationMode::Index);
        let backend = store.backend();
        for page in 0..200 {
            let query = format!("page={page}");
            populate(&store, CacheScope::TagList, None, Some(&query)).await;
            assert_eq!(hook.invalidate(EntityClass::Tag, Some("berlin")).await, 1);
        }
        assert!(backend.smembers("t:cache-index:tag:all").await.unwrap().is_empty());
        assert!(backend.smembers("t:cache-index:tag:collections").await.unwrap().is_empty());
        assert_eq!(store.delete_matching("t:cache:*").await, 0);
    }

    #[tokio::test]
    async fn cross_class_sets_are_pruned_too() {
        let (hook, store) = hook(InvalidationMode::Index);
        let backend = store.backend();
        // A category detail depends on the category and on every tag.
        populate(&store, CacheScope::CategoryDetail, Some("geography"), None).await;
        assert_eq!(hook.invalidate(EntityClass::Tag, Some("berlin")).await, 1);
        assert!(backend.smembers("t:cache-index:tag:all").await.unwrap().is_empty());
        assert!(backend.smembers("t:cache-index:category:all").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn disabled_backend_invalidates_nothing() {
        let config = CacheConfig::default();
        let store = Arc::new(CacheStore::new(
            CacheBackend::Disabled,
            DegradePolicy::from_config(&config),
            KeyCodec::new("t:", false),
            &config,
        ));
        let hook = InvalidationHook::new(store, Duration::from_millis(50));
        assert_eq!(hook.invalidate(EntityClass::Tag, Some("x")).await, 0);
    }
}
