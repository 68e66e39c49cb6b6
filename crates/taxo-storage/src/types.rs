//! Query types for the document store abstraction.
//!
//! Documents are plain JSON objects. Field paths may be dotted
//! (`metadata.priority`) to reach into nested objects.

use std::cmp::Ordering;

use serde_json::{Map, Value};

/// A single predicate over a document field.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Field equals the given value.
    Eq { field: String, value: Value },
    /// Numeric field within an inclusive range; open ends are `None`.
    Range {
        field: String,
        gte: Option<f64>,
        lte: Option<f64>,
    },
    /// Case-insensitive substring match against any of the fields.
    /// Array fields match when any element matches.
    Contains { fields: Vec<String>, needle: String },
}

/// A conjunction of conditions. An empty filter matches every document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an equality condition.
    #[must_use]
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Eq {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Adds an inclusive numeric range condition.
    #[must_use]
    pub fn range(mut self, field: impl Into<String>, gte: Option<f64>, lte: Option<f64>) -> Self {
        self.conditions.push(Condition::Range {
            field: field.into(),
            gte,
            lte,
        });
        self
    }

    /// Adds a case-insensitive substring condition over several fields.
    #[must_use]
    pub fn contains<I, S>(mut self, fields: I, needle: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.conditions.push(Condition::Contains {
            fields: fields.into_iter().map(Into::into).collect(),
            needle: needle.into(),
        });
        self
    }

    /// Returns the conditions of this filter.
    #[must_use]
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Returns true if the document satisfies every condition.
    #[must_use]
    pub fn matches(&self, doc: &Value) -> bool {
        self.conditions.iter().all(|c| condition_matches(c, doc))
    }
}

fn condition_matches(condition: &Condition, doc: &Value) -> bool {
    match condition {
        Condition::Eq { field, value } => lookup(doc, field) == Some(value),
        Condition::Range { field, gte, lte } => {
            let Some(n) = lookup(doc, field).and_then(Value::as_f64) else {
                return false;
            };
            gte.is_none_or(|min| n >= min) && lte.is_none_or(|max| n <= max)
        }
        Condition::Contains { fields, needle } => {
            let needle = needle.to_lowercase();
            fields.iter().any(|f| match lookup(doc, f) {
                Some(Value::String(s)) => s.to_lowercase().contains(&needle),
                Some(Value::Array(items)) => items.iter().any(|item| {
                    item.as_str()
                        .is_some_and(|s| s.to_lowercase().contains(&needle))
                }),
                _ => false,
            })
        }
    }
}

/// Resolves a dotted field path inside a JSON document.
#[must_use]
pub fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |current, segment| current.get(segment))
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// A multi-key sort order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sort {
    keys: Vec<(String, SortOrder)>,
}

impl Sort {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn asc(mut self, field: impl Into<String>) -> Self {
        self.keys.push((field.into(), SortOrder::Asc));
        self
    }

    #[must_use]
    pub fn desc(mut self, field: impl Into<String>) -> Self {
        self.keys.push((field.into(), SortOrder::Desc));
        self
    }

    /// Parses a comma separated sort expression such as `-usageCount,name`.
    ///
    /// A leading `-` means descending. Empty segments are ignored.
    #[must_use]
    pub fn parse(expr: &str) -> Self {
        let keys = expr
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty() && *s != "-")
            .map(|s| match s.strip_prefix('-') {
                Some(field) => (field.to_string(), SortOrder::Desc),
                None => (s.to_string(), SortOrder::Asc),
            })
            .collect();
        Self { keys }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Compares two documents by these keys in order.
    #[must_use]
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        for (field, order) in &self.keys {
            let ord = compare_values(lookup(a, field), lookup(b, field));
            let ord = match order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

// Missing values sort before present ones.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a, b) {
            (Value::Number(x), Value::Number(y)) => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
            (Value::String(x), Value::String(y)) => x.cmp(y),
            (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
            _ => Ordering::Equal,
        },
    }
}

/// Field inclusion list. `id` and `slug` are always kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    fields: Vec<String>,
}

impl Projection {
    #[must_use]
    pub fn include<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Parses a comma separated field list (`name,slug,category`).
    #[must_use]
    pub fn parse(expr: &str) -> Self {
        Self::include(expr.split(',').map(str::trim).filter(|s| !s.is_empty()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Applies the projection to a top-level JSON object.
    #[must_use]
    pub fn apply(&self, doc: &Value) -> Value {
        if self.fields.is_empty() {
            return doc.clone();
        }
        let Some(obj) = doc.as_object() else {
            return doc.clone();
        };
        let projected: Map<String, Value> = obj
            .iter()
            .filter(|(k, _)| {
                k.as_str() == "id" || k.as_str() == "slug" || self.fields.iter().any(|f| f == *k)
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Value::Object(projected)
    }
}

/// A paged `find` request.
#[derive(Debug, Clone, Default)]
pub struct FindQuery {
    pub filter: Filter,
    pub sort: Sort,
    pub skip: usize,
    /// `None` means unbounded; `Some(0)` only counts.
    pub limit: Option<usize>,
    pub projection: Projection,
}

impl FindQuery {
    #[must_use]
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sort = sort;
        self
    }

    #[must_use]
    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }
}

/// Result of a `find`: one page of documents plus the unpaged match count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindResult {
    pub items: Vec<Value>,
    pub total: usize,
}
