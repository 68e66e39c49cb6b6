//! The document store trait consumed by the route handlers.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StorageError;
use crate::types::{Filter, FindQuery, FindResult};

/// Contract every document store backend implements.
///
/// Documents live in named collections and are addressed by a unique
/// `slug` field. Implementations must be thread-safe (`Send + Sync`).
///
/// # Example
///
/// ```ignore
/// use taxo_storage::{DocumentStore, Filter, StorageError};
///
/// async fn get_tag(store: &dyn DocumentStore, slug: &str) -> Result<Value, StorageError> {
///     store
///         .find_one("tags", &Filter::new().eq("slug", slug))
///         .await?
///         .ok_or_else(|| StorageError::not_found("tags", slug))
/// }
/// ```
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Returns one page of matching documents and the total match count.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure issues.
    async fn find(&self, collection: &str, query: &FindQuery) -> Result<FindResult, StorageError>;

    /// Returns the first document matching the filter, if any.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure issues, not for missing documents.
    async fn find_one(&self, collection: &str, filter: &Filter)
    -> Result<Option<Value>, StorageError>;

    /// Inserts all documents or none of them.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::AlreadyExists` when a slug is already taken (or
    /// repeated within the batch), `StorageError::InvalidDocument` when a
    /// document is not an object or has no slug.
    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Value>,
    ) -> Result<Vec<Value>, StorageError>;

    /// Shallow-merges `patch` into the first matching document and returns
    /// the updated document, or `None` when nothing matched.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidDocument` when `patch` is not an object.
    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        patch: &Value,
    ) -> Result<Option<Value>, StorageError>;

    /// Counts matching documents.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure issues.
    async fn count(&self, collection: &str, filter: &Filter) -> Result<usize, StorageError> {
        let result = self
            .find(collection, &FindQuery::new(filter.clone()).with_limit(0))
            .await?;
        Ok(result.total)
    }
}
