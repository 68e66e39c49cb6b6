//! Read-through response cache.
//!
//! - [`keys`]: key layout, TTL tiers and per-endpoint dependencies
//! - [`store`]: fail-open get/set/delete on the shared backend
//! - [`aside`]: the per-route cache-aside middleware
//! - [`invalidation`]: eviction after writes, via index sets or SCAN

pub mod aside;
pub mod invalidation;
pub mod keys;
pub mod store;

pub use aside::{CACHE_STATUS, CachedResponse, CachedRoute, cache_aside};
pub use invalidation::InvalidationHook;
pub use keys::{CacheKey, CacheScope, EntityClass, KeyCodec, TtlTier};
pub use store::CacheStore;
