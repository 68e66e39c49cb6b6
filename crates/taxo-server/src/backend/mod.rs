//! Key-value backend shared by the response cache and the rate limiter.
//!
//! ## Modes
//!
//! - **Redis**: multi-instance mode. Every instance sees the same cache
//!   entries and counters through a shared `deadpool-redis` pool.
//! - **Memory**: single-instance mode backed by a `DashMap`, used when Redis
//!   is not configured and throughout the tests.
//! - **Disabled**: caching switched off; every call reports
//!   [`BackendError::Disabled`], which callers treat as a neutral outcome.
//!
//! The handle is constructed once at startup and cloned into every component
//! that needs it. Calls here are raw: timeouts and fail-open handling live in
//! [`DegradePolicy`].

mod memory;
mod policy;

pub use memory::MemoryBackend;
pub use policy::DegradePolicy;

use std::sync::Arc;
use std::time::Duration;

use deadpool_redis::Pool;
use redis::AsyncCommands;

use crate::error::BackendError;

const SCAN_BATCH: usize = 100;

#[derive(Clone)]
pub enum CacheBackend {
    Disabled,
    Memory(Arc<MemoryBackend>),
    Redis(Pool),
}

impl std::fmt::Debug for CacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CacheBackend").field(&self.mode()).finish()
    }
}

impl CacheBackend {
    pub fn new_memory() -> Self {
        CacheBackend::Memory(Arc::new(MemoryBackend::new()))
    }

    pub fn new_redis(pool: Pool) -> Self {
        CacheBackend::Redis(pool)
    }

    pub fn mode(&self) -> &'static str {
        match self {
            CacheBackend::Disabled => "disabled",
            CacheBackend::Memory(_) => "memory",
            CacheBackend::Redis(_) => "redis",
        }
    }

    /// Whether other instances see the same keys.
    pub fn is_shared(&self) -> bool {
        matches!(self, CacheBackend::Redis(_))
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        match self {
            CacheBackend::Disabled => Err(BackendError::Disabled),
            CacheBackend::Memory(mem) => mem.get(key),
            CacheBackend::Redis(pool) => {
                let mut conn = pool.get().await?;
                Ok(conn.get::<_, Option<Vec<u8>>>(key).await?)
            }
        }
    }

    /// SET with an expiry. A zero TTL is rounded up to one second.
    pub async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), BackendError> {
        let secs = ttl.as_secs().max(1);
        match self {
            CacheBackend::Disabled => Err(BackendError::Disabled),
            CacheBackend::Memory(mem) => {
                mem.set_ex(key, value.to_vec(), Duration::from_secs(secs));
                Ok(())
            }
            CacheBackend::Redis(pool) => {
                let mut conn = pool.get().await?;
                conn.set_ex::<_, _, ()>(key, value, secs).await?;
                Ok(())
            }
        }
    }

    /// Deletes `keys`, returning how many existed.
    pub async fn del(&self, keys: &[String]) -> Result<u64, BackendError> {
        if keys.is_empty() {
            return Ok(0);
        }
        match self {
            CacheBackend::Disabled => Err(BackendError::Disabled),
            CacheBackend::Memory(mem) => Ok(mem.del(keys)),
            CacheBackend::Redis(pool) => {
                let mut conn = pool.get().await?;
                Ok(conn.del::<_, u64>(keys).await?)
            }
        }
    }

    pub async fn incr(&self, key: &str) -> Result<i64, BackendError> {
        match self {
            CacheBackend::Disabled => Err(BackendError::Disabled),
            CacheBackend::Memory(mem) => mem.incr_by(key, 1),
            CacheBackend::Redis(pool) => {
                let mut conn = pool.get().await?;
                Ok(conn.incr::<_, _, i64>(key, 1).await?)
            }
        }
    }

    pub async fn decr(&self, key: &str) -> Result<i64, BackendError> {
        match self {
            CacheBackend::Disabled => Err(BackendError::Disabled),
            CacheBackend::Memory(mem) => mem.incr_by(key, -1),
            CacheBackend::Redis(pool) => {
                let mut conn = pool.get().await?;
                Ok(conn.decr::<_, _, i64>(key, 1).await?)
            }
        }
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, BackendError> {
        let secs = ttl.as_secs().max(1);
        match self {
            CacheBackend::Disabled => Err(BackendError::Disabled),
            CacheBackend::Memory(mem) => Ok(mem.expire(key, Duration::from_secs(secs))),
            CacheBackend::Redis(pool) => {
                let mut conn = pool.get().await?;
                Ok(conn.expire::<_, bool>(key, secs as i64).await?)
            }
        }
    }

    /// Redis TTL: -2 for a missing key, -1 for a key without expiry.
    pub async fn ttl(&self, key: &str) -> Result<i64, BackendError> {
        match self {
            CacheBackend::Disabled => Err(BackendError::Disabled),
            CacheBackend::Memory(mem) => Ok(mem.ttl(key)),
            CacheBackend::Redis(pool) => {
                let mut conn = pool.get().await?;
                Ok(conn.ttl::<_, i64>(key).await?)
            }
        }
    }

    /// Fixed-window hit counter: returns the post-increment count and the
    /// seconds left in the window.
    ///
    /// The expiry is armed only by the first hit of a window, so a steady
    /// stream of requests cannot keep a window open forever. A counter found
    /// without an expiry (a crash between INCR and EXPIRE) is re-armed.
    pub async fn hit_counter(&self, key: &str, window: Duration) -> Result<(i64, i64), BackendError> {
        let count = self.incr(key).await?;
        if count == 1 {
            self.expire(key, window).await?;
        }
        let mut ttl = self.ttl(key).await?;
        if ttl < 0 {
            self.expire(key, window).await?;
            ttl = window.as_secs().max(1) as i64;
        }
        Ok((count, ttl))
    }

    /// Adds `members` to each set in `sets` and refreshes the sets' expiry.
    pub async fn sadd_all(
        &self,
        sets: &[String],
        members: &[String],
        ttl: Duration,
    ) -> Result<(), BackendError> {
        if sets.is_empty() || members.is_empty() {
            return Ok(());
        }
        let secs = ttl.as_secs().max(1);
        match self {
            CacheBackend::Disabled => Err(BackendError::Disabled),
            CacheBackend::Memory(mem) => {
                for set in sets {
                    mem.sadd(set, members)?;
                    mem.expire(set, Duration::from_secs(secs));
                }
                Ok(())
            }
            CacheBackend::Redis(pool) => {
                let mut conn = pool.get().await?;
                let mut pipe = redis::pipe();
                pipe.atomic();
                for set in sets {
                    pipe.sadd(set, members).ignore();
                    pipe.expire(set, secs as i64).ignore();
                }
                let _: () = pipe.query_async(&mut conn).await?;
                Ok(())
            }
        }
    }

    pub async fn smembers(&self, set: &str) -> Result<Vec<String>, BackendError> {
        match self {
            CacheBackend::Disabled => Err(BackendError::Disabled),
            CacheBackend::Memory(mem) => mem.smembers(set),
            CacheBackend::Redis(pool) => {
                let mut conn = pool.get().await?;
                Ok(conn.smembers::<_, Vec<String>>(set).await?)
            }
        }
    }

    pub async fn srem(&self, set: &str, members: &[String]) -> Result<(), BackendError> {
        if members.is_empty() {
            return Ok(());
        }
        match self {
            CacheBackend::Disabled => Err(BackendError::Disabled),
            CacheBackend::Memory(mem) => mem.srem(set, members),
            CacheBackend::Redis(pool) => {
                let mut conn = pool.get().await?;
                conn.srem::<_, _, ()>(set, members).await?;
                Ok(())
            }
        }
    }

    /// Enumerates keys matching a glob. Uses cursor-based SCAN on Redis, never KEYS.
    pub async fn scan_match(&self, pattern: &str) -> Result<Vec<String>, BackendError> {
        match self {
            CacheBackend::Disabled => Err(BackendError::Disabled),
            CacheBackend::Memory(mem) => mem.scan_match(pattern),
            CacheBackend::Redis(pool) => {
                let mut conn = pool.get().await?;
                let mut cursor: u64 = 0;
                let mut keys = Vec::new();
                loop {
                    let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn)
                        .await?;
                    keys.extend(batch);
                    if next == 0 {
                        break;
                    }
                    cursor = next;
                }
                // SCAN may return a key more than once.
                keys.sort_unstable();
                keys.dedup();
                Ok(keys)
            }
        }
    }

    pub async fn ping(&self) -> Result<(), BackendError> {
        match self {
            CacheBackend::Disabled => Err(BackendError::Disabled),
            CacheBackend::Memory(_) => Ok(()),
            CacheBackend::Redis(pool) => {
                let mut conn = pool.get().await?;
                let _pong: String = redis::cmd("PING").query_async(&mut conn).await?;
                Ok(())
            }
        }
    }

    /// Releases backend resources. Called once on shutdown.
    pub fn close(&self) {
        match self {
            CacheBackend::Disabled => {}
            CacheBackend::Memory(mem) => mem.clear(),
            CacheBackend::Redis(pool) => {
                pool.close();
                tracing::info!("Redis pool closed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn hit_counter_arms_expiry_once_per_window() {
        let backend = CacheBackend::new_memory();
        let window = Duration::from_secs(60);

        assert_eq!(backend.hit_counter("rl", window).await.unwrap(), (1, 60));
        tokio::time::advance(Duration::from_secs(20)).await;
        // The second hit must not push the window out again.
        assert_eq!(backend.hit_counter("rl", window).await.unwrap(), (2, 40));

        tokio::time::advance(Duration::from_secs(41)).await;
        assert_eq!(backend.hit_counter("rl", window).await.unwrap(), (1, 60));
    }

    #[tokio::test]
    async fn hit_counter_rearms_counter_without_expiry() {
        let backend = CacheBackend::new_memory();
        backend.incr("rl").await.unwrap();
        assert_eq!(backend.ttl("rl").await.unwrap(), -1);

        let (count, ttl) = backend
            .hit_counter("rl", Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(ttl, 30);
        assert_eq!(backend.ttl("rl").await.unwrap(), 30);
    }

    #[tokio::test]
    async fn disabled_backend_refuses_every_call() {
        let backend = CacheBackend::Disabled;
        assert!(backend.get("k").await.unwrap_err().is_disabled());
        assert!(backend.incr("k").await.unwrap_err().is_disabled());
        assert!(backend.scan_match("*").await.unwrap_err().is_disabled());
        // Empty batches short-circuit before the mode check.
        assert_eq!(backend.del(&[]).await.unwrap(), 0);
        assert_eq!(backend.mode(), "disabled");
        assert!(!backend.is_shared());
        assert!(!CacheBackend::new_memory().is_shared());
    }

    #[tokio::test]
    async fn index_sets_get_an_expiry() {
        let backend = CacheBackend::new_memory();
        let sets = vec!["idx:a".to_string(), "idx:b".to_string()];
        backend
            .sadd_all(&sets, &["k1".to_string()], Duration::from_secs(90))
            .await
            .unwrap();
        assert_eq!(backend.smembers("idx:a").await.unwrap(), vec!["k1"]);
        assert_eq!(backend.ttl("idx:b").await.unwrap(), 90);
    }
}
