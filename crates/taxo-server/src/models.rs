//! Request payloads for tag and category writes.
//!
//! Stored documents are plain JSON; these types only validate input and
//! fill in derived fields (id, slug, timestamps) before it reaches the store.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

pub const TAGS: &str = "tags";
pub const CATEGORIES: &str = "categories";

pub const TAG_CATEGORIES: [&str; 8] = [
    "geography-timing",
    "people-roles",
    "domain-category",
    "skills-tools",
    "content-format",
    "intent-objectives",
    "constraints-compliance",
    "status-meta",
];

pub const TAG_TYPES: [&str; 3] = ["standard", "custom", "system"];

const DEFAULT_COLOR: &str = "#3B82F6";

/// Lowercase ASCII alphanumerics joined by single dashes.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else if c.is_whitespace() || c == '-' || c == '_' {
            pending_dash = true;
        }
    }
    slug
}

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

fn is_hex_color(value: &str) -> bool {
    value
        .strip_prefix('#')
        .is_some_and(|hex| (hex.len() == 6 || hex.len() == 3) && hex.chars().all(|c| c.is_ascii_hexdigit()))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagMetadata {
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub weight: Option<f64>,
}

impl TagMetadata {
    fn validate(&self) -> Result<(), String> {
        if let Some(color) = &self.color {
            if !is_hex_color(color) {
                return Err("Invalid color format. Use hex color code (e.g., #3B82F6)".into());
            }
        }
        if self.priority.is_some_and(|p| !(0..=100).contains(&p)) {
            return Err("Priority must be between 0 and 100".into());
        }
        if self.weight.is_some_and(|w| w < 0.0) {
            return Err("Weight must be a positive number".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTag {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub category: String,
    pub subcategory: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub metadata: TagMetadata,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub search_keywords: Vec<String>,
    /// Slugs of related tags, resolved on the detail read.
    #[serde(default)]
    pub related_tags: Vec<String>,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_true")]
    pub is_public: bool,
    #[serde(default)]
    pub is_featured: bool,
}

fn default_true() -> bool {
    true
}

impl NewTag {
    pub fn validate(&self) -> Result<(), String> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err("Tag name is required".into());
        }
        if name.chars().count() > 100 {
            return Err("Tag name cannot exceed 100 characters".into());
        }
        if slugify(name).is_empty() {
            return Err("Tag name must contain at least one letter or digit".into());
        }
        if self
            .description
            .as_deref()
            .is_some_and(|d| d.trim().chars().count() > 500)
        {
            return Err("Description cannot exceed 500 characters".into());
        }
        if !TAG_CATEGORIES.contains(&self.category.as_str()) {
            return Err("Invalid category".into());
        }
        if self.subcategory.trim().is_empty() {
            return Err("Subcategory is required".into());
        }
        if let Some(kind) = &self.kind {
            if !TAG_TYPES.contains(&kind.as_str()) {
                return Err("Invalid type".into());
            }
        }
        if self.aliases.iter().any(|a| a.trim().chars().count() > 100) {
            return Err("Each alias cannot exceed 100 characters".into());
        }
        self.metadata.validate()
    }

    pub fn slug(&self) -> String {
        slugify(&self.name)
    }

    /// The stored document: derived slug, id and timestamps, and the
    /// lowercased name added to the search keywords.
    pub fn into_document(self) -> Value {
        let name = self.name.trim().to_string();
        let slug = slugify(&name);
        let mut keywords: Vec<String> = self
            .search_keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        let lowered = name.to_lowercase();
        if !keywords.contains(&lowered) {
            keywords.push(lowered);
        }
        let subcategory = self.subcategory.trim().to_string();
        let category_path = format!("{}/{}", self.category, subcategory);
        let now = now_rfc3339();
        json!({
            "id": Uuid::new_v4().to_string(),
            "name": name,
            "slug": slug,
            "description": self.description.map(|d| d.trim().to_string()),
            "category": self.category,
            "subcategory": subcategory,
            "categoryPath": category_path,
            "type": self.kind.unwrap_or_else(|| "standard".to_string()),
            "metadata": {
                "color": self.metadata.color.unwrap_or_else(|| DEFAULT_COLOR.to_string()),
                "icon": self.metadata.icon,
                "priority": self.metadata.priority.unwrap_or(50),
                "weight": self.metadata.weight.unwrap_or(1.0),
            },
            "aliases": self.aliases.iter().map(|a| a.trim()).collect::<Vec<_>>(),
            "searchKeywords": keywords,
            "relatedTags": related_slugs(&self.related_tags),
            "usageCount": self.usage_count,
            "isActive": self.is_active,
            "isPublic": self.is_public,
            "isFeatured": self.is_featured,
            "createdAt": now,
            "updatedAt": now,
        })
    }
}

fn related_slugs(slugs: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(slugs.len());
    for slug in slugs.iter().map(|s| slugify(s)).filter(|s| !s.is_empty()) {
        if !out.contains(&slug) {
            out.push(slug);
        }
    }
    out
}

/// Validates a partial tag update and stamps `updatedAt`.
///
/// Slugs are stable: a rename keeps the slug the tag was created with.
pub fn tag_patch(patch: Value) -> Result<Value, String> {
    let Value::Object(mut fields) = patch else {
        return Err("Request body must be a JSON object".into());
    };
    for protected in ["id", "slug", "createdAt"] {
        fields.remove(protected);
    }
    if let Some(name) = fields.get("name") {
        let name = name.as_str().map(str::trim).unwrap_or_default();
        if name.is_empty() {
            return Err("Tag name is required".into());
        }
        if name.chars().count() > 100 {
            return Err("Tag name cannot exceed 100 characters".into());
        }
    }
    if let Some(category) = fields.get("category") {
        if !category.as_str().is_some_and(|c| TAG_CATEGORIES.contains(&c)) {
            return Err("Invalid category".into());
        }
    }
    if let Some(kind) = fields.get("type") {
        if !kind.as_str().is_some_and(|k| TAG_TYPES.contains(&k)) {
            return Err("Invalid type".into());
        }
    }
    if let Some(metadata) = fields.get("metadata") {
        let metadata: TagMetadata = serde_json::from_value(metadata.clone())
            .map_err(|e| format!("Invalid metadata: {e}"))?;
        metadata.validate()?;
    }
    for list in ["aliases", "searchKeywords"] {
        if fields.get(list).is_some_and(|v| !v.is_array()) {
            return Err(format!("{list} must be an array"));
        }
    }
    if let Some(related) = fields.get_mut("relatedTags") {
        let slugs: Vec<String> = serde_json::from_value(related.take())
            .map_err(|_| "relatedTags must be an array of tag slugs".to_string())?;
        *related = json!(related_slugs(&slugs));
    }
    stamp(&mut fields);
    Ok(Value::Object(fields))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSubcategory {
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub examples: Vec<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCategory {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub subcategories: Vec<NewSubcategory>,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl NewCategory {
    pub fn validate(&self) -> Result<(), String> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err("Category name is required".into());
        }
        if name.chars().count() > 100 {
            return Err("Category name cannot exceed 100 characters".into());
        }
        if slugify(name).is_empty() {
            return Err("Category name must contain at least one letter or digit".into());
        }
        let description = self.description.trim();
        if description.is_empty() {
            return Err("Category description is required".into());
        }
        if description.chars().count() > 1000 {
            return Err("Description cannot exceed 1000 characters".into());
        }
        if self.subcategories.iter().any(|s| s.name.trim().is_empty()) {
            return Err("Subcategory name is required".into());
        }
        if self.color.as_deref().is_some_and(|c| !is_hex_color(c)) {
            return Err("Invalid color format. Use hex color code (e.g., #3B82F6)".into());
        }
        Ok(())
    }

    pub fn slug(&self) -> String {
        slugify(&self.name)
    }

    pub fn into_document(self) -> Value {
        let name = self.name.trim().to_string();
        let slug = slugify(&name);
        let subcategories: Vec<Value> = self
            .subcategories
            .into_iter()
            .map(|sub| {
                let slug = sub
                    .slug
                    .map(|s| s.to_lowercase())
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| slugify(&sub.name));
                json!({
                    "name": sub.name.trim(),
                    "slug": slug,
                    "description": sub.description,
                    "examples": sub.examples,
                    "isActive": sub.is_active,
                })
            })
            .collect();
        let now = now_rfc3339();
        json!({
            "id": Uuid::new_v4().to_string(),
            "name": name,
            "slug": slug,
            "description": self.description.trim(),
            "subcategories": subcategories,
            "order": self.order,
            "icon": self.icon,
            "color": self.color.unwrap_or_else(|| DEFAULT_COLOR.to_string()),
            "isActive": self.is_active,
            "createdAt": now,
            "updatedAt": now,
        })
    }
}

pub fn category_patch(patch: Value) -> Result<Value, String> {
    let Value::Object(mut fields) = patch else {
        return Err("Request body must be a JSON object".into());
    };
    for protected in ["id", "slug", "createdAt", "tagCount"] {
        fields.remove(protected);
    }
    if let Some(name) = fields.get("name") {
        if name.as_str().map(str::trim).unwrap_or_default().is_empty() {
            return Err("Category name is required".into());
        }
    }
    if let Some(color) = fields.get("color") {
        if !color.as_str().is_some_and(is_hex_color) {
            return Err("Invalid color format. Use hex color code (e.g., #3B82F6)".into());
        }
    }
    if fields.get("subcategories").is_some_and(|v| !v.is_array()) {
        return Err("subcategories must be an array".into());
    }
    stamp(&mut fields);
    Ok(Value::Object(fields))
}

/// Subcategories still marked active.
pub fn active_subcategories(category: &Value) -> Vec<Value> {
    category
        .get("subcategories")
        .and_then(Value::as_array)
        .map(|subs| {
            subs.iter()
                .filter(|s| s.get("isActive").and_then(Value::as_bool).unwrap_or(true))
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

fn stamp(fields: &mut Map<String, Value>) {
    fields.insert("updatedAt".into(), Value::String(now_rfc3339()));
}
