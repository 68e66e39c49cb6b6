use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use taxo_storage::{Filter, FindQuery, Sort};

use super::{body, decode, flag, success};
use crate::cache::EntityClass;
use crate::error::ApiError;
use crate::models::{CATEGORIES, NewCategory, TAGS, active_subcategories, category_patch, now_rfc3339};
use crate::server::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryListParams {
    pub is_active: Option<String>,
}

pub async fn list_categories(
    State(state): State<AppState>,
    Query(params): Query<CategoryListParams>,
) -> Result<Response, ApiError> {
    let mut filter = Filter::new();
    if let Some(active) = flag(params.is_active.as_deref()) {
        filter = filter.eq("isActive", active);
    }
    let query = FindQuery::new(filter).with_sort(Sort::new().asc("order").asc("name"));
    let found = state.store.find(CATEGORIES, &query).await?;
    Ok(success(
        StatusCode::OK,
        json!({
            "results": found.items.len(),
            "data": { "categories": found.items },
        }),
    ))
}

/// Category detail with the number of visible tags filed under it.
pub async fn get_category(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Response, ApiError> {
    let mut category = find_active(&state, &slug).await?;
    let tag_count = state
        .store
        .count(
            TAGS,
            &Filter::new()
                .eq("category", slug.as_str())
                .eq("isActive", true)
                .eq("isPublic", true),
        )
        .await?;
    if let Some(obj) = category.as_object_mut() {
        obj.insert("tagCount".into(), json!(tag_count));
    }
    Ok(success(
        StatusCode::OK,
        json!({ "data": { "category": category } }),
    ))
}

pub async fn get_subcategories(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Response, ApiError> {
    let category = find_active(&state, &slug).await?;
    let subcategories = active_subcategories(&category);
    Ok(success(
        StatusCode::OK,
        json!({
            "results": subcategories.len(),
            "data": { "subcategories": subcategories },
        }),
    ))
}

pub async fn create_category(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let new_category: NewCategory = decode(body(payload)?)?;
    new_category.validate().map_err(ApiError::bad_request)?;
    let slug = new_category.slug();

    let mut created = state
        .store
        .insert_many(CATEGORIES, vec![new_category.into_document()])
        .await?;
    state
        .invalidation
        .invalidate(EntityClass::Category, Some(&slug))
        .await;

    let category = created.pop().unwrap_or(Value::Null);
    Ok(success(
        StatusCode::CREATED,
        json!({ "data": { "category": category } }),
    ))
}

pub async fn update_category(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let patch = category_patch(body(payload)?).map_err(ApiError::bad_request)?;
    let category = state
        .store
        .update_one(CATEGORIES, &Filter::new().eq("slug", slug.as_str()), &patch)
        .await?
        .ok_or_else(|| ApiError::not_found("Category not found"))?;
    state
        .invalidation
        .invalidate(EntityClass::Category, Some(&slug))
        .await;
    Ok(success(
        StatusCode::OK,
        json!({ "data": { "category": category } }),
    ))
}

pub async fn delete_category(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Response, ApiError> {
    let patch = json!({ "isActive": false, "updatedAt": now_rfc3339() });
    state
        .store
        .update_one(CATEGORIES, &Filter::new().eq("slug", slug.as_str()), &patch)
        .await?
        .ok_or_else(|| ApiError::not_found("Category not found"))?;
    state
        .invalidation
        .invalidate(EntityClass::Category, Some(&slug))
        .await;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn find_active(state: &AppState, slug: &str) -> Result<Value, ApiError> {
    state
        .store
        .find_one(
            CATEGORIES,
            &Filter::new().eq("slug", slug).eq("isActive", true),
        )
        .await?
        .ok_or_else(|| ApiError::not_found("Category not found"))
}
