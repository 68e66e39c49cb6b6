use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::StorageError;
use crate::traits::DocumentStore;
use crate::types::{Filter, FindQuery, FindResult};

type Collection = IndexMap<String, Value>;

/// In-memory document store.
///
/// Each collection is an insertion-ordered map keyed by slug, so unfiltered
/// reads come back in creation order. Soft deletes are ordinary updates.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn slug_of(doc: &Value) -> Result<String, StorageError> {
    let obj = doc
        .as_object()
        .ok_or_else(|| StorageError::invalid_document("document must be a JSON object"))?;
    obj.get("slug")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| StorageError::invalid_document("document must carry a non-empty slug"))
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn find(&self, collection: &str, query: &FindQuery) -> Result<FindResult, StorageError> {
        let guard = self.collections.read().await;
        let Some(docs) = guard.get(collection) else {
            return Ok(FindResult::default());
        };

        let mut matched: Vec<&Value> = docs.values().filter(|d| query.filter.matches(d)).collect();
        let total = matched.len();

        if !query.sort.is_empty() {
            // Stable sort keeps insertion order for ties.
            matched.sort_by(|a, b| query.sort.compare(a, b));
        }

        let items = matched
            .into_iter()
            .skip(query.skip)
            .take(query.limit.unwrap_or(usize::MAX))
            .map(|d| query.projection.apply(d))
            .collect();

        Ok(FindResult { items, total })
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<Value>, StorageError> {
        let guard = self.collections.read().await;
        Ok(guard
            .get(collection)
            .and_then(|docs| docs.values().find(|d| filter.matches(d)).cloned()))
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Value>,
    ) -> Result<Vec<Value>, StorageError> {
        let mut guard = self.collections.write().await;
        let docs = guard.entry(collection.to_string()).or_default();

        // Validate the whole batch before touching the collection.
        let mut seen = HashSet::new();
        let mut keyed = Vec::with_capacity(documents.len());
        for doc in documents {
            let slug = slug_of(&doc)?;
            if docs.contains_key(&slug) || !seen.insert(slug.clone()) {
                return Err(StorageError::already_exists(collection, slug));
            }
            keyed.push((slug, doc));
        }

        let inserted: Vec<Value> = keyed.iter().map(|(_, doc)| doc.clone()).collect();
        docs.extend(keyed);
        tracing::debug!(collection, count = docs.len(), "documents inserted");
        Ok(inserted)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        patch: &Value,
    ) -> Result<Option<Value>, StorageError> {
        let patch = patch
            .as_object()
            .ok_or_else(|| StorageError::invalid_document("patch must be a JSON object"))?;

        let mut guard = self.collections.write().await;
        let Some(docs) = guard.get_mut(collection) else {
            return Ok(None);
        };
        let Some(doc) = docs.values_mut().find(|d| filter.matches(d)) else {
            return Ok(None);
        };

        if let Some(obj) = doc.as_object_mut() {
            for (k, v) in patch {
                // The slug is the collection key and never changes in place.
                if k == "slug" {
                    continue;
                }
                obj.insert(k.clone(), v.clone());
            }
        }
        Ok(Some(doc.clone()))
    }
}
