use std::time::Duration;

use time::OffsetDateTime;

use crate::backend::{CacheBackend, DegradePolicy};
use crate::cache::KeyCodec;

/// Outcome of counting a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Usage {
    Counted {
        /// Requests in the current window, this one included.
        count: u64,
        reset_at: OffsetDateTime,
        reset_in: Duration,
    },
    /// The backend could not be reached.
    Unknown,
}

/// Fixed-window request counter for one limiter, shared across instances
/// through the backend.
#[derive(Debug, Clone)]
pub struct RateLimitCounter {
    backend: CacheBackend,
    policy: DegradePolicy,
    codec: KeyCodec,
    limiter: &'static str,
    window: Duration,
}

impl RateLimitCounter {
    pub fn new(
        backend: CacheBackend,
        policy: DegradePolicy,
        codec: KeyCodec,
        limiter: &'static str,
        window: Duration,
    ) -> Self {
        Self {
            backend,
            policy,
            codec,
            limiter,
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn key(&self, identity: &str) -> String {
        self.codec.rate_limit_key(self.limiter, identity)
    }

    pub async fn increment(&self, identity: &str) -> Usage {
        let key = self.key(identity);
        let counted = self
            .policy
            .guard("incr", &key, self.backend.hit_counter(&key, self.window))
            .await;
        match counted {
            Some((count, ttl)) => {
                let reset_in = Duration::from_secs(ttl.max(0) as u64);
                Usage::Counted {
                    count: count.max(0) as u64,
                    reset_at: OffsetDateTime::now_utc() + reset_in,
                    reset_in,
                }
            }
            None => Usage::Unknown,
        }
    }

    /// Takes back one counted request.
    pub async fn decrement(&self, identity: &str) {
        let key = self.key(identity);
        self.policy
            .guard("decr", &key, self.backend.decr(&key))
            .await;
    }

    /// Forgets the caller's window entirely.
    pub async fn reset_key(&self, identity: &str) {
        let key = self.key(identity);
        let keys = [key];
        self.policy
            .guard("del", &keys[0], self.backend.del(&keys))
            .await;
    }
}
