use std::time::Duration;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderName, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use uuid::Uuid;

pub const REQUEST_ID: &str = "x-request-id";

// Ensures each request has an X-Request-Id and mirrors it on the response
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let header_name = HeaderName::from_static(REQUEST_ID);

    // Keep a caller-supplied id; generate one otherwise
    let req_id_value = match req.headers().get(&header_name) {
        Some(value) => value.clone(),
        None => HeaderValue::try_from(Uuid::new_v4().to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("unknown")),
    };

    // Visible to the trace span and handlers
    req.extensions_mut().insert(req_id_value.clone());

    let mut res = next.run(req).await;
    res.headers_mut().insert(header_name, req_id_value);
    res
}

// Bounds the whole request; backend calls carry their own, shorter timeouts
pub async fn request_timeout(
    State(limit): State<Duration>,
    req: Request<Body>,
    next: Next,
) -> Response {
    match tokio::time::timeout(limit, next.run(req)).await {
        Ok(res) => res,
        Err(_) => {
            tracing::warn!(timeout_ms = limit.as_millis() as u64, "request timed out");
            (
                StatusCode::REQUEST_TIMEOUT,
                Json(json!({ "status": "error", "message": "Request timed out" })),
            )
                .into_response()
        }
    }
}
