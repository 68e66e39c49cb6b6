//! Cache-aside middleware for read endpoints.
//!
//! Wraps a single route: a hit replays the stored response without reaching
//! the handler, a miss runs the handler and stores its 2xx response before
//! it is sent.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{RawPathParams, Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::{RequestPartsExt, http::Method};
use serde::{Deserialize, Serialize};

use super::keys::{CacheKey, CacheScope};
use super::store::CacheStore;

pub const CACHE_STATUS: &str = "cache-status";

/// Stored form of a response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl CachedResponse {
    pub fn encode(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }

    fn replay(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        let mut response = (status, Body::from(self.body)).into_response();
        if let Some(value) = self
            .content_type
            .and_then(|ct| HeaderValue::from_str(&ct).ok())
        {
            response.headers_mut().insert(header::CONTENT_TYPE, value);
        }
        response
    }
}

/// Middleware state for one cached route.
#[derive(Clone)]
pub struct CachedRoute {
    pub cache: Arc<CacheStore>,
    pub scope: CacheScope,
}

impl CachedRoute {
    pub fn new(cache: Arc<CacheStore>, scope: CacheScope) -> Self {
        Self { cache, scope }
    }
}

pub async fn cache_aside(State(route): State<CachedRoute>, req: Request, next: Next) -> Response {
    if req.method() != Method::GET {
        return next.run(req).await;
    }

    let (mut parts, body) = req.into_parts();
    let id = match route.scope.path_param() {
        Some(name) => parts.extract::<RawPathParams>().await.ok().and_then(|params| {
            params
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        }),
        None => None,
    };
    let key = route
        .cache
        .codec()
        .cache_key(route.scope, id.as_deref(), parts.uri.query());
    let req = Request::from_parts(parts, body);

    if let Some(bytes) = route.cache.get(&key.key).await {
        match CachedResponse::decode(&bytes) {
            Ok(cached) => {
                tracing::debug!(key = %key, "cache hit");
                crate::metrics::record_cache_hit(route.scope.segment());
                return with_cache_status(cached.replay(), "HIT");
            }
            // Corrupt entries are a miss and get overwritten below.
            Err(e) => tracing::warn!(key = %key, error = %e, "undecodable cache entry"),
        }
    }

    tracing::debug!(key = %key, "cache miss");
    crate::metrics::record_cache_miss(route.scope.segment());
    let response = next.run(req).await;
    if !response.status().is_success() {
        return with_cache_status(response, "MISS");
    }

    let (parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(key = %key, error = %e, "failed to buffer response body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    populate(route.cache.clone(), key, &parts, &bytes).await;

    with_cache_status(Response::from_parts(parts, Body::from(bytes)), "MISS")
}

/// Writes the entry from a detached task, so it completes even when the
/// client goes away before the response is sent.
async fn populate(
    cache: Arc<CacheStore>,
    key: CacheKey,
    parts: &axum::http::response::Parts,
    body: &Bytes,
) {
    let cached = CachedResponse {
        status: parts.status.as_u16(),
        content_type: parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body: body.to_vec(),
    };
    let encoded = match cached.encode() {
        Ok(encoded) => encoded,
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "failed to encode response for caching");
            return;
        }
    };
    let task = tokio::spawn(async move { cache.remember(&key, &encoded).await });
    if let Err(e) = task.await {
        tracing::warn!(error = %e, "cache population task failed");
    }
}

fn with_cache_status(mut response: Response, status: &'static str) -> Response {
    response
        .headers_mut()
        .insert(CACHE_STATUS, HeaderValue::from_static(status));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CacheBackend, DegradePolicy};
    use crate::cache::keys::KeyCodec;
    use crate::config::CacheConfig;
    use axum::Router;
    use axum::routing::get;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    fn cache() -> Arc<CacheStore> {
        let config = CacheConfig::default();
        Arc::new(CacheStore::new(
            CacheBackend::new_memory(),
            DegradePolicy::from_config(&config),
            KeyCodec::new("t:", false),
            &config,
        ))
    }

    fn app(cache: Arc<CacheStore>, calls: Arc<AtomicUsize>) -> Router {
        let detail_calls = calls.clone();
        Router::new()
            .route(
                "/tags/{slug}",
                get(move |axum::extract::Path(slug): axum::extract::Path<String>| {
                    let calls = detail_calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        if slug == "missing" {
                            return (StatusCode::NOT_FOUND, "nope").into_response();
                        }
                        axum::Json(serde_json::json!({ "slug": slug })).into_response()
                    }
                })
                .layer(axum::middleware::from_fn_with_state(
                    CachedRoute::new(cache, CacheScope::TagDetail),
                    cache_aside,
                )),
            )
    }

    async fn send(app: &Router, uri: &str) -> (StatusCode, Option<String>, Vec<u8>) {
        let response = app
            .clone()
            .oneshot(axum::http::Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let cache_status = response
            .headers()
            .get(CACHE_STATUS)
            .map(|v| v.to_str().unwrap().to_string());
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec();
        (status, cache_status, body)
    }

    #[tokio::test]
    async fn second_read_is_replayed_from_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(cache(), calls.clone());

        let first = send(&app, "/tags/berlin").await;
        let second = send(&app, "/tags/berlin").await;
        assert_eq!(first.1.as_deref(), Some("MISS"));
        assert_eq!(second.1.as_deref(), Some("HIT"));
        assert_eq!(first.2, second.2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // A different query string is a different entry.
        let third = send(&app, "/tags/berlin?fields=name").await;
        assert_eq!(third.1.as_deref(), Some("MISS"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn error_responses_are_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(cache(), calls.clone());
        for _ in 0..2 {
            let (status, cache_status, _) = send(&app, "/tags/missing").await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(cache_status.as_deref(), Some("MISS"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn corrupt_entries_are_misses() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(cache.clone(), calls.clone());
        let key = cache
            .codec()
            .cache_key(CacheScope::TagDetail, Some("berlin"), None);
        cache
            .set_with_ttl(&key.key, b"\xc1 not msgpack", std::time::Duration::from_secs(60))
            .await;

        let (status, cache_status, _) = send(&app, "/tags/berlin").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cache_status.as_deref(), Some("MISS"));
        // Overwritten by the fresh response.
        let (_, cache_status, _) = send(&app, "/tags/berlin").await;
        assert_eq!(cache_status.as_deref(), Some("HIT"));
    }
}
