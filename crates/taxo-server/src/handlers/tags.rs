//! Tag endpoints.
//!
//! Reads only ever see active, public tags unless a filter says otherwise.
//! Every successful write invalidates the tag class before responding.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use taxo_storage::{Filter, FindQuery, Projection, Sort};

use super::{body, decode, flag, number, page_size, success};
use crate::cache::EntityClass;
use crate::error::ApiError;
use crate::models::{NewTag, TAGS, now_rfc3339, tag_patch};
use crate::server::AppState;

const DEFAULT_SORT: &str = "-usageCount";
const SEARCH_FIELDS: [&str; 3] = ["name", "description", "searchKeywords"];
const SUGGEST_FIELDS: [&str; 3] = ["name", "searchKeywords", "aliases"];
const SUGGEST_PROJECTION: &str = "name,slug,category,subcategory,usageCount";
const RELATED_PROJECTION: &str = "name,slug,category,subcategory";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagListParams {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub sort: Option<String>,
    pub fields: Option<String>,
    pub search: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub is_active: Option<String>,
    pub is_public: Option<String>,
    pub is_featured: Option<String>,
    pub min_usage: Option<String>,
    pub max_usage: Option<String>,
}

impl TagListParams {
    fn filter(&self) -> Result<Filter, ApiError> {
        let mut filter = Filter::new();
        if let Some(search) = self.search.as_deref().filter(|s| !s.is_empty()) {
            filter = filter.contains(SEARCH_FIELDS, search);
        }
        for (field, value) in [
            ("category", &self.category),
            ("subcategory", &self.subcategory),
            ("type", &self.kind),
        ] {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                filter = filter.eq(field, value);
            }
        }
        filter = filter
            .eq("isActive", flag(self.is_active.as_deref()).unwrap_or(true))
            .eq("isPublic", flag(self.is_public.as_deref()).unwrap_or(true));
        if let Some(featured) = flag(self.is_featured.as_deref()) {
            filter = filter.eq("isFeatured", featured);
        }
        let min = number::<f64>("minUsage", self.min_usage.as_deref())?;
        let max = number::<f64>("maxUsage", self.max_usage.as_deref())?;
        if min.is_some() || max.is_some() {
            filter = filter.range("usageCount", min, max);
        }
        Ok(filter)
    }
}

pub async fn list_tags(
    State(state): State<AppState>,
    Query(params): Query<TagListParams>,
) -> Result<Response, ApiError> {
    let page = number::<usize>("page", params.page.as_deref())?
        .unwrap_or(1)
        .max(1);
    let limit = page_size(
        params.limit.as_deref(),
        state.pagination.default_limit,
        state.pagination.max_limit,
    )?;
    let query = FindQuery::new(params.filter()?)
        .with_sort(Sort::parse(params.sort.as_deref().unwrap_or(DEFAULT_SORT)))
        .with_skip((page - 1) * limit)
        .with_limit(limit)
        .with_projection(Projection::parse(params.fields.as_deref().unwrap_or_default()));

    let found = state.store.find(TAGS, &query).await?;
    Ok(success(
        StatusCode::OK,
        json!({
            "results": found.items.len(),
            "pagination": {
                "page": page,
                "limit": limit,
                "total": found.total,
                "pages": found.total.div_ceil(limit),
            },
            "data": { "tags": found.items },
        }),
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitParams {
    pub limit: Option<String>,
    pub sort: Option<String>,
}

pub async fn popular_tags(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Result<Response, ApiError> {
    let limit = page_size(params.limit.as_deref(), 10, state.pagination.max_limit)?;
    let query = FindQuery::new(visible())
        .with_sort(Sort::parse(DEFAULT_SORT))
        .with_limit(limit);
    let found = state.store.find(TAGS, &query).await?;
    Ok(list_response(found.items))
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    pub limit: Option<String>,
}

/// Autocomplete over names, keywords and aliases.
pub async fn search_tags(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Response, ApiError> {
    let q = params
        .q
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ApiError::bad_request("Please provide a search query"))?;
    let limit = page_size(params.limit.as_deref(), 10, state.pagination.max_limit)?;
    let query = FindQuery::new(visible().contains(SUGGEST_FIELDS, q))
        .with_sort(Sort::parse(DEFAULT_SORT))
        .with_limit(limit)
        .with_projection(Projection::parse(SUGGEST_PROJECTION));
    let found = state.store.find(TAGS, &query).await?;
    Ok(list_response(found.items))
}

pub async fn tags_by_category(
    State(state): State<AppState>,
    Path(category): Path<String>,
    Query(params): Query<LimitParams>,
) -> Result<Response, ApiError> {
    let limit = page_size(params.limit.as_deref(), 50, state.pagination.max_limit)?;
    let query = FindQuery::new(visible().eq("category", category))
        .with_sort(Sort::parse(params.sort.as_deref().unwrap_or(DEFAULT_SORT)))
        .with_limit(limit);
    let found = state.store.find(TAGS, &query).await?;
    Ok(list_response(found.items))
}

pub async fn get_tag(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Response, ApiError> {
    let mut tag = state
        .store
        .find_one(TAGS, &visible().eq("slug", slug))
        .await?
        .ok_or_else(|| ApiError::not_found("Tag not found"))?;
    resolve_related(&state, &mut tag).await?;
    Ok(success(StatusCode::OK, json!({ "data": { "tag": tag } })))
}

/// Replaces the stored related slugs with a summary of each related tag.
/// Slugs that no longer resolve to a visible tag are left out.
async fn resolve_related(state: &AppState, tag: &mut Value) -> Result<(), ApiError> {
    let Some(related) = tag.get_mut("relatedTags") else {
        return Ok(());
    };
    let slugs: Vec<String> = related
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let projection = Projection::parse(RELATED_PROJECTION);
    let mut resolved = Vec::with_capacity(slugs.len());
    for slug in slugs {
        if let Some(found) = state.store.find_one(TAGS, &visible().eq("slug", slug)).await? {
            resolved.push(projection.apply(&found));
        }
    }
    *related = Value::Array(resolved);
    Ok(())
}

pub async fn create_tag(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let new_tag: NewTag = decode(body(payload)?)?;
    new_tag.validate().map_err(ApiError::bad_request)?;
    let slug = new_tag.slug();

    let mut created = state
        .store
        .insert_many(TAGS, vec![new_tag.into_document()])
        .await?;
    state
        .invalidation
        .invalidate(EntityClass::Tag, Some(&slug))
        .await;

    let tag = created.pop().unwrap_or(Value::Null);
    Ok(success(StatusCode::CREATED, json!({ "data": { "tag": tag } })))
}

#[derive(Debug, Deserialize)]
pub struct BulkTags {
    pub tags: Option<Vec<Value>>,
}

/// Creates all tags or none. Invalidates the whole tag class, since no
/// single slug covers the batch.
pub async fn bulk_create_tags(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let BulkTags { tags } = decode(body(payload)?)?;
    let tags = tags
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::bad_request("Please provide an array of tags"))?;

    let mut documents = Vec::with_capacity(tags.len());
    for (i, raw) in tags.into_iter().enumerate() {
        let new_tag: NewTag =
            decode(raw).map_err(|e| ApiError::bad_request(format!("tags[{i}]: {e}")))?;
        new_tag
            .validate()
            .map_err(|e| ApiError::bad_request(format!("tags[{i}]: {e}")))?;
        documents.push(new_tag.into_document());
    }

    let created = state.store.insert_many(TAGS, documents).await?;
    state.invalidation.invalidate(EntityClass::Tag, None).await;

    Ok(success(
        StatusCode::CREATED,
        json!({
            "results": created.len(),
            "data": { "tags": created },
        }),
    ))
}

pub async fn update_tag(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let patch = tag_patch(body(payload)?).map_err(ApiError::bad_request)?;
    let tag = state
        .store
        .update_one(TAGS, &Filter::new().eq("slug", slug.as_str()), &patch)
        .await?
        .ok_or_else(|| ApiError::not_found("Tag not found"))?;
    state
        .invalidation
        .invalidate(EntityClass::Tag, Some(&slug))
        .await;
    Ok(success(StatusCode::OK, json!({ "data": { "tag": tag } })))
}

/// Soft delete: the tag is deactivated, not removed.
pub async fn delete_tag(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Response, ApiError> {
    let patch = json!({ "isActive": false, "updatedAt": now_rfc3339() });
    state
        .store
        .update_one(TAGS, &Filter::new().eq("slug", slug.as_str()), &patch)
        .await?
        .ok_or_else(|| ApiError::not_found("Tag not found"))?;
    state
        .invalidation
        .invalidate(EntityClass::Tag, Some(&slug))
        .await;
    Ok(StatusCode::NO_CONTENT.into_response())
}

fn visible() -> Filter {
    Filter::new().eq("isActive", true).eq("isPublic", true)
}

fn list_response(items: Vec<Value>) -> Response {
    success(
        StatusCode::OK,
        json!({
            "results": items.len(),
            "data": { "tags": items },
        }),
    )
}
