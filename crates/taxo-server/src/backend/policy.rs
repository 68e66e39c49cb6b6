//! Fail-open wrapper around backend calls.

use std::future::Future;
use std::time::Duration;

use crate::config::CacheConfig;
use crate::error::BackendError;

/// How a failing or slow backend call is turned into a neutral outcome.
///
/// Every call is bounded by `op_timeout`. A failure is logged at `warn`,
/// counted in `cache_backend_errors_total` and then swallowed, so the caller
/// falls back to "skip the optimization". `degrade_gracefully` is consulted
/// where swallowing is not enough on its own: at startup, and by the rate
/// limiter when it cannot learn a caller's usage.
#[derive(Debug, Clone, Copy)]
pub struct DegradePolicy {
    pub degrade_gracefully: bool,
    pub op_timeout: Duration,
}

impl DegradePolicy {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            degrade_gracefully: config.degrade_gracefully,
            op_timeout: Duration::from_millis(config.op_timeout_ms),
        }
    }

    /// Runs `fut` under the per-call timeout.
    pub async fn run<T, F>(&self, op: &'static str, fut: F) -> Result<T, BackendError>
    where
        F: Future<Output = Result<T, BackendError>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout {
                op,
                after: self.op_timeout,
            }),
        }
    }

    /// Logs and drops a failed outcome.
    pub fn neutralize<T>(
        &self,
        op: &'static str,
        key: &str,
        result: Result<T, BackendError>,
    ) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) if e.is_disabled() => {
                tracing::trace!(op, key = %key, "cache backend disabled, skipping");
                None
            }
            Err(e) => {
                tracing::warn!(op, key = %key, error = %e, "cache backend call failed, continuing without it");
                crate::metrics::record_backend_error(op);
                None
            }
        }
    }

    /// [`run`](Self::run) followed by [`neutralize`](Self::neutralize).
    pub async fn guard<T, F>(&self, op: &'static str, key: &str, fut: F) -> Option<T>
    where
        F: Future<Output = Result<T, BackendError>>,
    {
        let result = self.run(op, fut).await;
        self.neutralize(op, key, result)
    }
}

impl Default for DegradePolicy {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}
