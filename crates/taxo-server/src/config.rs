use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Redis configuration
    #[serde(default)]
    pub redis: RedisConfig,
    /// Response cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
    /// Request quota configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.request_timeout_ms == 0 {
            return Err("server.request_timeout_ms must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        // Backend validations
        if self.redis.enabled && self.redis.url.is_empty() {
            return Err("redis.enabled=true requires redis.url".into());
        }
        if self.redis.pool_size == 0 {
            return Err("redis.pool_size must be > 0".into());
        }
        if self.cache.op_timeout_ms == 0 || self.cache.invalidation_timeout_ms == 0 {
            return Err("cache timeouts must be > 0".into());
        }
        let ttl = &self.cache.ttl;
        if ttl.list_secs == 0 || ttl.entity_secs == 0 || ttl.search_secs == 0 || ttl.metadata_secs == 0
        {
            return Err("cache.ttl tiers must be > 0".into());
        }
        // Rate limit validations
        for (name, limiter) in [
            ("rate_limit", self.rate_limit.general.clone()),
            ("rate_limit.auth", self.rate_limit.auth.limiter()),
        ] {
            if limiter.window_secs == 0 {
                return Err(format!("{name}.window_secs must be > 0"));
            }
            if limiter.max == 0 {
                return Err(format!("{name}.max must be > 0"));
            }
        }
        // Pagination validations
        if self.pagination.default_limit == 0 || self.pagination.max_limit == 0 {
            return Err("pagination limits must be > 0".into());
        }
        if self.pagination.default_limit > self.pagination.max_limit {
            return Err("pagination.default_limit must be <= pagination.max_limit".into());
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Honour the last `X-Forwarded-For` hop when deriving the caller
    /// address. Enable only behind exactly one reverse proxy.
    #[serde(default = "default_trust_proxy")]
    pub trust_proxy: bool,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    3000
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_trust_proxy() -> bool {
    false
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_ms: default_request_timeout_ms(),
            trust_proxy: default_trust_proxy(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Redis configuration for horizontal scaling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Enable Redis. When disabled the service keeps cache entries and
    /// counters in-process, which is only correct for a single instance.
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Pool wait/create/recycle timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,

    /// Prefix applied to every key this service writes
    #[serde(default = "default_redis_key_prefix")]
    pub key_prefix: String,
}

fn default_redis_enabled() -> bool {
    false
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    1000
}

fn default_redis_key_prefix() -> String {
    "taxo:".to_string()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
            key_prefix: default_redis_key_prefix(),
        }
    }
}

/// How write endpoints find the cache entries to evict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationMode {
    /// Targeted delete through the per-class / per-entity key index.
    #[default]
    Index,
    /// Glob pattern resolved by scanning the keyspace.
    Scan,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Disable to make every cache and counter call a no-op.
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,

    /// Fail open on backend errors. When false the service refuses to start
    /// without a reachable backend and the rate limiter rejects requests it
    /// cannot count.
    #[serde(default = "default_degrade_gracefully")]
    pub degrade_gracefully: bool,

    /// Upper bound for a single backend call
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,

    /// Upper bound for a whole invalidation run
    #[serde(default = "default_invalidation_timeout_ms")]
    pub invalidation_timeout_ms: u64,

    #[serde(default)]
    pub invalidation_mode: InvalidationMode,

    /// Sort query parameters before building list keys. Off by default: the
    /// raw query string is used verbatim.
    #[serde(default)]
    pub canonicalize_query: bool,

    #[serde(default)]
    pub ttl: CacheTtlConfig,
}

fn default_cache_enabled() -> bool {
    true
}
fn default_degrade_gracefully() -> bool {
    true
}
fn default_op_timeout_ms() -> u64 {
    250
}
fn default_invalidation_timeout_ms() -> u64 {
    500
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            degrade_gracefully: default_degrade_gracefully(),
            op_timeout_ms: default_op_timeout_ms(),
            invalidation_timeout_ms: default_invalidation_timeout_ms(),
            invalidation_mode: InvalidationMode::default(),
            canonicalize_query: false,
            ttl: CacheTtlConfig::default(),
        }
    }
}

/// TTL per endpoint tier, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheTtlConfig {
    #[serde(default = "default_list_ttl")]
    pub list_secs: u64,
    #[serde(default = "default_entity_ttl")]
    pub entity_secs: u64,
    #[serde(default = "default_search_ttl")]
    pub search_secs: u64,
    #[serde(default = "default_metadata_ttl")]
    pub metadata_secs: u64,
}

fn default_list_ttl() -> u64 {
    1800 // 30 minutes
}
fn default_entity_ttl() -> u64 {
    1800
}
fn default_search_ttl() -> u64 {
    600 // 10 minutes
}
fn default_metadata_ttl() -> u64 {
    3600 // 1 hour
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            list_secs: default_list_ttl(),
            entity_secs: default_entity_ttl(),
            search_secs: default_search_ttl(),
            metadata_secs: default_metadata_ttl(),
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,

    /// Header carrying the caller's API key
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,

    /// Roles that bypass the counters entirely
    #[serde(default = "default_exempt_roles")]
    pub exempt_roles: Vec<String>,

    /// Limiter applied to every `/api` request
    #[serde(flatten)]
    pub general: LimiterConfig,

    /// Strict limiter for authentication endpoints
    #[serde(default)]
    pub auth: AuthLimiterConfig,
}

fn default_rate_limit_enabled() -> bool {
    true
}
fn default_api_key_header() -> String {
    "x-api-key".into()
}
fn default_exempt_roles() -> Vec<String> {
    vec!["superadmin".into()]
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            api_key_header: default_api_key_header(),
            exempt_roles: default_exempt_roles(),
            general: LimiterConfig::default(),
            auth: AuthLimiterConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Requests allowed per window
    #[serde(default = "default_max_requests")]
    pub max: u64,
    /// Give back the quota of requests that end below 400
    #[serde(default)]
    pub skip_successful_requests: bool,
}

fn default_window_secs() -> u64 {
    15 * 60
}
fn default_max_requests() -> u64 {
    1000
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            max: default_max_requests(),
            skip_successful_requests: false,
        }
    }
}

/// Same shape as [`LimiterConfig`] with stricter defaults: 5 attempts per
/// 15 minutes, successful attempts not counted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthLimiterConfig {
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_auth_max_requests")]
    pub max: u64,
    #[serde(default = "default_auth_skip_successful")]
    pub skip_successful_requests: bool,
}

fn default_auth_max_requests() -> u64 {
    5
}
fn default_auth_skip_successful() -> bool {
    true
}

impl AuthLimiterConfig {
    pub fn limiter(&self) -> LimiterConfig {
        LimiterConfig {
            window_secs: self.window_secs,
            max: self.max,
            skip_successful_requests: self.skip_successful_requests,
        }
    }
}

impl Default for AuthLimiterConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            max: default_auth_max_requests(),
            skip_successful_requests: default_auth_skip_successful(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    #[serde(default = "default_page_limit")]
    pub default_limit: usize,
    #[serde(default = "default_max_page_limit")]
    pub max_limit: usize,
}

fn default_page_limit() -> usize {
    20
}
fn default_max_page_limit() -> usize {
    100
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_limit: default_page_limit(),
            max_limit: default_max_page_limit(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or("taxo.toml"));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., TAXO__REDIS__URL=redis://cache:6379
        builder = builder.add_source(
            Environment::with_prefix("TAXO")
                .try_parsing(true)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("rate_limit.exempt_roles"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
