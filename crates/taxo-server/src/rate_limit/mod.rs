//! Distributed fixed-window rate limiting.
//!
//! Counters live in the shared backend, so every instance enforces the same
//! quota. Two limiters are built from configuration: the general API limiter
//! and a strict one for authentication endpoints that only counts failed
//! attempts.

pub mod counter;
pub mod middleware;

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderName;

pub use counter::{RateLimitCounter, Usage};
pub use middleware::{
    CallerIdentity, CallerRole, RATELIMIT_LIMIT, RATELIMIT_REMAINING, RATELIMIT_RESET,
    RateLimiter, rate_limit,
};

use crate::backend::{CacheBackend, DegradePolicy};
use crate::cache::KeyCodec;
use crate::config::{LimiterConfig, RateLimitConfig};

pub const GENERAL_MESSAGE: &str = "Too many requests, please try again later.";
pub const AUTH_MESSAGE: &str = "Too many authentication attempts, please try again later.";

impl RateLimiter {
    pub fn general(
        config: &RateLimitConfig,
        trust_proxy: bool,
        backend: CacheBackend,
        policy: DegradePolicy,
        codec: KeyCodec,
    ) -> Result<Arc<Self>, String> {
        Self::build(
            "api",
            GENERAL_MESSAGE,
            &config.general,
            config,
            trust_proxy,
            backend,
            policy,
            codec,
        )
    }

    pub fn auth(
        config: &RateLimitConfig,
        trust_proxy: bool,
        backend: CacheBackend,
        policy: DegradePolicy,
        codec: KeyCodec,
    ) -> Result<Arc<Self>, String> {
        Self::build(
            "auth",
            AUTH_MESSAGE,
            &config.auth.limiter(),
            config,
            trust_proxy,
            backend,
            policy,
            codec,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        name: &'static str,
        message: &'static str,
        limits: &LimiterConfig,
        config: &RateLimitConfig,
        trust_proxy: bool,
        backend: CacheBackend,
        policy: DegradePolicy,
        codec: KeyCodec,
    ) -> Result<Arc<Self>, String> {
        let api_key_header = HeaderName::try_from(config.api_key_header.to_ascii_lowercase())
            .map_err(|e| format!("invalid rate_limit.api_key_header: {e}"))?;
        Ok(Arc::new(RateLimiter {
            name,
            counter: RateLimitCounter::new(
                backend,
                policy,
                codec,
                name,
                Duration::from_secs(limits.window_secs),
            ),
            max: limits.max,
            skip_successful_requests: limits.skip_successful_requests,
            exempt_roles: config.exempt_roles.clone(),
            api_key_header,
            trust_proxy,
            degrade_gracefully: policy.degrade_gracefully,
            message,
        }))
    }
}
