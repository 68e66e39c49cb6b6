use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use time::format_description::well_known::Rfc3339;

use super::counter::{RateLimitCounter, Usage};

pub const RATELIMIT_LIMIT: &str = "ratelimit-limit";
pub const RATELIMIT_REMAINING: &str = "ratelimit-remaining";
pub const RATELIMIT_RESET: &str = "ratelimit-reset";

/// Role of an authenticated caller, inserted as a request extension by
/// whatever authenticates requests upstream of the limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerRole(pub String);

/// Who a request is counted against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallerIdentity {
    ApiKey(String),
    Address(String),
}

impl CallerIdentity {
    /// API key when present, else the client address: the last
    /// `X-Forwarded-For` hop behind a trusted proxy, else the peer address.
    /// Only the last hop is written by the proxy; earlier ones come from the
    /// client.
    pub fn of(req: &Request, api_key_header: &HeaderName, trust_proxy: bool) -> Self {
        if let Some(key) = header_str(req.headers(), api_key_header) {
            return CallerIdentity::ApiKey(key.to_string());
        }
        if trust_proxy {
            let forwarded = header_str(req.headers(), "x-forwarded-for")
                .and_then(|v| v.rsplit(',').next())
                .map(str::trim)
                .filter(|hop| !hop.is_empty());
            if let Some(hop) = forwarded {
                return CallerIdentity::Address(hop.to_string());
            }
        }
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        CallerIdentity::Address(peer)
    }
}

impl fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallerIdentity::ApiKey(key) => write!(f, "apikey:{key}"),
            CallerIdentity::Address(addr) => write!(f, "ip:{addr}"),
        }
    }
}

fn header_str<K: axum::http::header::AsHeaderName>(headers: &HeaderMap, name: K) -> Option<&str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// One configured limiter: the general API limiter or the strict auth one.
#[derive(Debug)]
pub struct RateLimiter {
    pub name: &'static str,
    pub counter: RateLimitCounter,
    pub max: u64,
    /// Requests that end below 400 are taken back after the fact.
    pub skip_successful_requests: bool,
    pub exempt_roles: Vec<String>,
    pub api_key_header: HeaderName,
    pub trust_proxy: bool,
    /// Allow requests whose usage cannot be determined.
    pub degrade_gracefully: bool,
    pub message: &'static str,
}

impl RateLimiter {
    fn is_exempt(&self, req: &Request) -> bool {
        req.extensions()
            .get::<CallerRole>()
            .is_some_and(|CallerRole(role)| self.exempt_roles.iter().any(|r| r == role))
    }
}

pub async fn rate_limit(State(limiter): State<Arc<RateLimiter>>, req: Request, next: Next) -> Response {
    if limiter.is_exempt(&req) {
        return next.run(req).await;
    }

    let identity = CallerIdentity::of(&req, &limiter.api_key_header, limiter.trust_proxy).to_string();
    let (count, reset_at, reset_in) = match limiter.counter.increment(&identity).await {
        Usage::Counted {
            count,
            reset_at,
            reset_in,
        } => (count, reset_at, reset_in),
        Usage::Unknown if limiter.degrade_gracefully => return next.run(req).await,
        Usage::Unknown => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "error",
                    "message": "Rate limiting is temporarily unavailable, please try again later.",
                })),
            )
                .into_response();
        }
    };

    let remaining = limiter.max.saturating_sub(count);
    let reset_secs = reset_in.as_secs();

    if count > limiter.max {
        tracing::warn!(limiter = limiter.name, identity = %identity, count, "rate limit exceeded");
        crate::metrics::record_rate_limit_rejection(limiter.name);
        let retry_after = reset_at.format(&Rfc3339).unwrap_or_default();
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "status": "error",
                "message": limiter.message,
                "retryAfter": retry_after,
            })),
        )
            .into_response();
        let headers = response.headers_mut();
        quota_headers(headers, limiter.max, remaining, reset_secs);
        headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(reset_secs));
        return response;
    }

    let mut response = next.run(req).await;
    if limiter.skip_successful_requests && response.status().as_u16() < 400 {
        limiter.counter.decrement(&identity).await;
    }
    quota_headers(response.headers_mut(), limiter.max, remaining, reset_secs);
    response
}

fn quota_headers(headers: &mut HeaderMap, limit: u64, remaining: u64, reset_secs: u64) {
    headers.insert(RATELIMIT_LIMIT, HeaderValue::from(limit));
    headers.insert(RATELIMIT_REMAINING, HeaderValue::from(remaining));
    headers.insert(RATELIMIT_RESET, HeaderValue::from(reset_secs));
}
