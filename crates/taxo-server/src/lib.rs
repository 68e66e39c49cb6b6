pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod rate_limit;
pub mod server;

pub use backend::CacheBackend;
pub use config::{AppConfig, CacheConfig, RedisConfig};
pub use server::{AppParts, AppState, ServerBuilder, TaxoServer, build_app};

/// Opens the key-value backend described by configuration.
///
/// Without Redis the service runs on the in-process backend. With Redis the
/// pool is created and checked with `PING`; an unreachable server is only
/// fatal when `cache.degrade_gracefully` is off. Otherwise the pool is kept,
/// calls fail fast against it, and callers fall back to their neutral
/// outcomes until Redis comes back.
pub async fn create_cache_backend(
    redis: &RedisConfig,
    cache: &CacheConfig,
) -> Result<CacheBackend, String> {
    use std::time::Duration;

    if !redis.enabled {
        tracing::info!("Redis disabled, using in-process backend (single instance only)");
        return Ok(CacheBackend::new_memory());
    }

    tracing::info!(url = %redis.url, "Connecting to Redis");

    let mut redis_config = deadpool_redis::Config::from_url(&redis.url);
    let timeout = Duration::from_millis(redis.timeout_ms);
    let pool_config = redis_config
        .pool
        .get_or_insert_with(|| deadpool_redis::PoolConfig::new(redis.pool_size));
    pool_config.max_size = redis.pool_size;
    pool_config.timeouts.wait = Some(timeout);
    pool_config.timeouts.create = Some(timeout);
    pool_config.timeouts.recycle = Some(timeout);

    let pool = redis_config
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .map_err(|e| format!("failed to create Redis pool: {e}"))?;
    let backend = CacheBackend::new_redis(pool);

    let reachable = tokio::time::timeout(timeout, backend.ping())
        .await
        .unwrap_or(Err(error::BackendError::Timeout {
            op: "ping",
            after: timeout,
        }));

    match reachable {
        Ok(()) => {
            tracing::info!("Connected to Redis");
            Ok(backend)
        }
        Err(e) if cache.degrade_gracefully => {
            tracing::warn!(
                error = %e,
                "Redis unreachable; serving uncached until it recovers"
            );
            crate::metrics::record_backend_error("connect");
            Ok(backend)
        }
        Err(e) => Err(format!("Redis unreachable at {}: {e}", redis.url)),
    }
}
