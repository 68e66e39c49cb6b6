//! # taxo-storage
//!
//! Document store abstraction for the Taxo tag service.
//!
//! The route handlers talk to persistence only through [`DocumentStore`]:
//! - `find` with filter, sort, skip, limit and projection, returning the page and total
//! - `find_one` by filter
//! - `insert_many`
//! - `update_one` by filter with a shallow patch
//!
//! [`InMemoryStore`] is the bundled backend used for single-node deployments
//! and tests.
//!
//! ## Example
//!
//! ```ignore
//! use taxo_storage::{DocumentStore, Filter, FindQuery, Sort};
//!
//! async fn popular(store: &dyn DocumentStore) -> Result<Vec<Value>, StorageError> {
//!     let query = FindQuery::new(Filter::new().eq("isActive", true))
//!         .with_sort(Sort::new().desc("usageCount"))
//!         .with_limit(10);
//!     Ok(store.find("tags", &query).await?.items)
//! }
//! ```

mod error;
mod memory;
mod traits;
mod types;

pub use error::{ErrorCategory, StorageError};
pub use memory::InMemoryStore;
pub use traits::DocumentStore;
pub use types::{
    Condition, Filter, FindQuery, FindResult, Projection, Sort, SortOrder, lookup,
};
