pub mod categories;
pub mod tags;

use std::str::FromStr;

use axum::Json;
use axum::Extension;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::error::ApiError;
use crate::rate_limit::CallerRole;
use crate::server::AppState;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "cache": state.backend_mode,
    }))
}

pub async fn metrics() -> Response {
    match crate::metrics::render_metrics() {
        Some(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics are not enabled").into_response(),
    }
}

/// Drops every cached response. Only callers holding an admin role may
/// purge; counters and index sets are kept.
pub async fn purge_cache(
    State(state): State<AppState>,
    role: Option<Extension<CallerRole>>,
) -> Result<Response, ApiError> {
    let role = role
        .map(|Extension(CallerRole(role))| role)
        .filter(|role| state.admin_roles.contains(role))
        .ok_or_else(|| ApiError::forbidden("You do not have permission to perform this action"))?;
    let deleted = state.cache.purge().await;
    tracing::warn!(role = %role, deleted, "response cache purged by admin");
    Ok(success(StatusCode::OK, json!({ "data": { "deleted": deleted } })))
}

/// `{"status":"success", ...}` with the given extra fields.
pub(crate) fn success(status: StatusCode, fields: Value) -> Response {
    let mut body = json!({ "status": "success" });
    if let (Some(obj), Value::Object(extra)) = (body.as_object_mut(), fields) {
        obj.extend(extra);
    }
    (status, Json(body)).into_response()
}

/// Unwraps a JSON body, turning a malformed one into a 400.
pub(crate) fn body(payload: Result<Json<Value>, JsonRejection>) -> Result<Value, ApiError> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| ApiError::bad_request(e.body_text()))
}

pub(crate) fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ApiError> {
    serde_json::from_value(value).map_err(|e| ApiError::bad_request(e.to_string()))
}

/// Parses an optional numeric query parameter.
pub(crate) fn number<T: FromStr>(name: &str, raw: Option<&str>) -> Result<Option<T>, ApiError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|_| ApiError::bad_request(format!("{name} must be a number"))),
    }
}

/// Query booleans are true only when spelled `true`.
pub(crate) fn flag(raw: Option<&str>) -> Option<bool> {
    raw.map(|v| v == "true")
}

/// Requested page size, defaulted and capped.
pub(crate) fn page_size(
    raw: Option<&str>,
    default: usize,
    max: usize,
) -> Result<usize, ApiError> {
    let limit = number::<usize>("limit", raw)?.unwrap_or(default);
    if limit == 0 {
        return Err(ApiError::bad_request("limit must be at least 1"));
    }
    Ok(limit.min(max))
}
