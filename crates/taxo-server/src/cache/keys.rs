//! Cache and rate-limit key construction.
//!
//! Layout (with the default `taxo:` prefix):
//!
//! ```text
//! taxo:cache:{segment}:{variant}                 cached response
//! taxo:cache-index:{class}:all                   every key depending on a class
//! taxo:cache-index:{class}:collections           list/search keys of a class
//! taxo:cache-index:{class}:entity:{id}           single-entity keys
//! taxo:rate-limit:{limiter}:{identity}           fixed-window counter
//! ```
//!
//! Cache keys and counters never share a namespace, so no invalidation
//! pattern anchored under `cache:` can match a counter.

use std::fmt;
use std::time::Duration;

use crate::config::{CacheConfig, CacheTtlConfig, RedisConfig};

/// Entity classes a cached response can depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityClass {
    Tag,
    Category,
}

impl EntityClass {
    pub const ALL: [EntityClass; 2] = [EntityClass::Tag, EntityClass::Category];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityClass::Tag => "tag",
            EntityClass::Category => "category",
        }
    }
}

impl fmt::Display for EntityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Staleness tolerance of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlTier {
    List,
    Entity,
    Search,
    Metadata,
}

impl TtlTier {
    pub fn duration(&self, ttl: &CacheTtlConfig) -> Duration {
        let secs = match self {
            TtlTier::List => ttl.list_secs,
            TtlTier::Entity => ttl.entity_secs,
            TtlTier::Search => ttl.search_secs,
            TtlTier::Metadata => ttl.metadata_secs,
        };
        Duration::from_secs(secs)
    }

    /// Longest configured tier; index sets must outlive every key they track.
    pub fn longest(ttl: &CacheTtlConfig) -> Duration {
        let secs = ttl
            .list_secs
            .max(ttl.entity_secs)
            .max(ttl.search_secs)
            .max(ttl.metadata_secs);
        Duration::from_secs(secs)
    }
}

/// How a cached response depends on a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    /// Only on the entity named by the path parameter.
    Entity(EntityClass),
    /// On the class as a whole (lists, searches, aggregates).
    Collection(EntityClass),
}

impl Dependency {
    pub fn class(&self) -> EntityClass {
        match self {
            Dependency::Entity(c) | Dependency::Collection(c) => *c,
        }
    }
}

/// Every cacheable read endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheScope {
    TagList,
    TagPopular,
    TagSearch,
    TagsByCategory,
    TagDetail,
    CategoryList,
    CategoryDetail,
    Subcategories,
}

impl CacheScope {
    pub const ALL: [CacheScope; 8] = [
        CacheScope::TagList,
        CacheScope::TagPopular,
        CacheScope::TagSearch,
        CacheScope::TagsByCategory,
        CacheScope::TagDetail,
        CacheScope::CategoryList,
        CacheScope::CategoryDetail,
        CacheScope::Subcategories,
    ];

    /// Key segment. Always names the class, so tag, category and search
    /// keys cannot collide.
    pub fn segment(&self) -> &'static str {
        match self {
            CacheScope::TagList => "tags:all",
            CacheScope::TagPopular => "tags:popular",
            CacheScope::TagSearch => "tags:search",
            CacheScope::TagsByCategory => "tags:category",
            CacheScope::TagDetail => "tag",
            CacheScope::CategoryList => "categories:all",
            CacheScope::CategoryDetail => "category",
            CacheScope::Subcategories => "subcategories",
        }
    }

    pub fn tier(&self) -> TtlTier {
        match self {
            CacheScope::TagList | CacheScope::TagPopular | CacheScope::TagsByCategory => {
                TtlTier::List
            }
            CacheScope::TagSearch => TtlTier::Search,
            CacheScope::TagDetail => TtlTier::Entity,
            CacheScope::CategoryList | CacheScope::CategoryDetail | CacheScope::Subcategories => {
                TtlTier::Metadata
            }
        }
    }

    /// Name of the path parameter that identifies the response, if any.
    pub fn path_param(&self) -> Option<&'static str> {
        match self {
            CacheScope::TagDetail | CacheScope::CategoryDetail | CacheScope::Subcategories => {
                Some("slug")
            }
            CacheScope::TagsByCategory => Some("category"),
            _ => None,
        }
    }

    pub fn dependencies(&self) -> &'static [Dependency] {
        use Dependency::*;
        use EntityClass::*;
        match self {
            CacheScope::TagList
            | CacheScope::TagPopular
            | CacheScope::TagSearch
            | CacheScope::TagsByCategory => &[Collection(Tag)],
            // The detail embeds its related tags.
            CacheScope::TagDetail => &[Entity(Tag), Collection(Tag)],
            CacheScope::CategoryList => &[Collection(Category)],
            // The detail embeds a tag count.
            CacheScope::CategoryDetail => &[Entity(Category), Collection(Tag)],
            CacheScope::Subcategories => &[Entity(Category)],
        }
    }
}

/// A concrete cache key plus what it depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub key: String,
    pub scope: CacheScope,
    pub id: Option<String>,
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Which index set of a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSet<'a> {
    All,
    Collections,
    Entity(&'a str),
}

#[derive(Debug, Clone)]
pub struct KeyCodec {
    prefix: String,
    canonicalize_query: bool,
}

impl KeyCodec {
    pub fn new(prefix: impl Into<String>, canonicalize_query: bool) -> Self {
        Self {
            prefix: prefix.into(),
            canonicalize_query,
        }
    }

    pub fn from_config(redis: &RedisConfig, cache: &CacheConfig) -> Self {
        Self::new(redis.key_prefix.clone(), cache.canonicalize_query)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Builds the key of a cached response.
    ///
    /// The variant is the raw query string, or `{id}` / `{id}?{query}` for
    /// scopes addressed by a path parameter. Every query parameter is kept,
    /// unknown ones included. Parameter order is significant unless
    /// `canonicalize_query` is set.
    pub fn cache_key(&self, scope: CacheScope, id: Option<&str>, query: Option<&str>) -> CacheKey {
        let query = query.filter(|q| !q.is_empty()).map(|q| {
            if self.canonicalize_query {
                canonical_query(q)
            } else {
                q.to_string()
            }
        });
        let variant = match (id, query.as_deref()) {
            (Some(id), Some(q)) => format!("{id}?{q}"),
            (Some(id), None) => id.to_string(),
            (None, Some(q)) => q.to_string(),
            (None, None) => String::new(),
        };
        CacheKey {
            key: format!("{}cache:{}:{}", self.prefix, scope.segment(), variant),
            scope,
            id: id.map(str::to_string),
        }
    }

    pub fn rate_limit_key(&self, limiter: &str, identity: &str) -> String {
        format!("{}rate-limit:{}:{}", self.prefix, limiter, identity)
    }

    pub fn index_key(&self, class: EntityClass, set: IndexSet<'_>) -> String {
        match set {
            IndexSet::All => format!("{}cache-index:{}:all", self.prefix, class),
            IndexSet::Collections => format!("{}cache-index:{}:collections", self.prefix, class),
            IndexSet::Entity(id) => format!("{}cache-index:{}:entity:{}", self.prefix, class, id),
        }
    }

    /// Index sets a freshly populated key must be registered in.
    pub fn index_sets_for(&self, key: &CacheKey) -> Vec<String> {
        let mut sets = Vec::new();
        for dep in key.scope.dependencies() {
            let class = dep.class();
            push_unique(&mut sets, self.index_key(class, IndexSet::All));
            match (dep, key.id.as_deref()) {
                (Dependency::Entity(_), Some(id)) => {
                    push_unique(&mut sets, self.index_key(class, IndexSet::Entity(id)))
                }
                // An entity scope without an id can only be reached through
                // the class-wide set; treat it like a collection.
                _ => push_unique(&mut sets, self.index_key(class, IndexSet::Collections)),
            }
        }
        sets
    }

    /// Index sets whose members must go when `class` (or one of its
    /// entities) is written.
    pub fn invalidation_sets(&self, class: EntityClass, id: Option<&str>) -> Vec<String> {
        match id {
            Some(id) => vec![
                self.index_key(class, IndexSet::Entity(id)),
                self.index_key(class, IndexSet::Collections),
            ],
            None => vec![self.index_key(class, IndexSet::All)],
        }
    }

    /// Class-wide and collection sets of every class. Any evicted key may
    /// still be listed in one of them.
    pub fn shared_index_sets(&self) -> Vec<String> {
        EntityClass::ALL
            .into_iter()
            .flat_map(|class| {
                [
                    self.index_key(class, IndexSet::All),
                    self.index_key(class, IndexSet::Collections),
                ]
            })
            .collect()
    }

    /// Glob patterns covering the same keys as [`invalidation_sets`](Self::invalidation_sets),
    /// for scan-based invalidation.
    pub fn invalidation_patterns(&self, class: EntityClass, id: Option<&str>) -> Vec<String> {
        let mut patterns = Vec::new();
        for scope in CacheScope::ALL {
            for dep in scope.dependencies() {
                if dep.class() != class {
                    continue;
                }
                let pattern = match (dep, id) {
                    (Dependency::Entity(_), Some(id)) => format!(
                        "{}cache:{}:{}*",
                        escape_glob(&self.prefix),
                        scope.segment(),
                        escape_glob(id)
                    ),
                    _ => format!("{}cache:{}:*", escape_glob(&self.prefix), scope.segment()),
                };
                push_unique(&mut patterns, pattern);
            }
        }
        patterns
    }

    /// Pattern matching every cached response (never a counter or index set).
    pub fn all_responses_pattern(&self) -> String {
        format!("{}cache:*", escape_glob(&self.prefix))
    }
}

fn push_unique(into: &mut Vec<String>, value: String) {
    if !into.contains(&value) {
        into.push(value);
    }
}

/// Sorts query pairs by name, then value. Repeated names keep all values.
fn canonical_query(raw: &str) -> String {
    let mut pairs: Vec<(String, String)> = url::form_urlencoded::parse(raw.as_bytes())
        .into_owned()
        .collect();
    pairs.sort();
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> KeyCodec {
        KeyCodec::new("taxo:", false)
    }

    #[test]
    fn keys_carry_the_class_segment() {
        let c = codec();
        let list = c.cache_key(CacheScope::TagList, None, Some("category=geography-timing"));
        assert_eq!(list.key, "taxo:cache:tags:all:category=geography-timing");

        let tag = c.cache_key(CacheScope::TagDetail, Some("berlin"), None);
        let category = c.cache_key(CacheScope::CategoryDetail, Some("berlin"), None);
        assert_eq!(tag.key, "taxo:cache:tag:berlin");
        assert_eq!(category.key, "taxo:cache:category:berlin");
        assert_ne!(tag.key, category.key);

        let by_category = c.cache_key(CacheScope::TagsByCategory, Some("music"), Some("limit=5"));
        assert_eq!(by_category.key, "taxo:cache:tags:category:music?limit=5");

        assert_eq!(
            c.cache_key(CacheScope::CategoryList, None, Some("")).key,
            "taxo:cache:categories:all:"
        );
    }

    #[test]
    fn raw_query_keeps_order_and_unknown_params() {
        let c = codec();
        let a = c.cache_key(CacheScope::TagList, None, Some("type=a&category=b"));
        let b = c.cache_key(CacheScope::TagList, None, Some("category=b&type=a"));
        assert_ne!(a.key, b.key);

        let with_unknown = c.cache_key(CacheScope::TagList, None, Some("category=b&foo=1"));
        let without = c.cache_key(CacheScope::TagList, None, Some("category=b"));
        assert_ne!(with_unknown.key, without.key);
    }

    #[test]
    fn canonical_query_ignores_order() {
        let c = KeyCodec::new("taxo:", true);
        let a = c.cache_key(CacheScope::TagList, None, Some("type=a&category=b&foo=%20x"));
        let b = c.cache_key(CacheScope::TagList, None, Some("foo=+x&category=b&type=a"));
        assert_eq!(a.key, b.key);
        assert_eq!(a.key, "taxo:cache:tags:all:category=b&foo=+x&type=a");
    }

    #[test]
    fn rate_limit_keys_live_outside_the_cache_namespace() {
        let c = codec();
        let key = c.rate_limit_key("api", "ip:10.0.0.1");
        assert_eq!(key, "taxo:rate-limit:api:ip:10.0.0.1");
        let re = regex::Regex::new("^taxo:cache:.*$").unwrap();
        assert!(!re.is_match(&key));
    }

    #[test]
    fn category_detail_is_indexed_under_both_classes() {
        let c = codec();
        let key = c.cache_key(CacheScope::CategoryDetail, Some("music"), None);
        assert_eq!(
            c.index_sets_for(&key),
            vec![
                "taxo:cache-index:category:all",
                "taxo:cache-index:category:entity:music",
                "taxo:cache-index:tag:all",
                "taxo:cache-index:tag:collections",
            ]
        );

        let detail = c.cache_key(CacheScope::TagDetail, Some("berlin"), None);
        assert_eq!(
            c.index_sets_for(&detail),
            vec![
                "taxo:cache-index:tag:all",
                "taxo:cache-index:tag:entity:berlin",
                "taxo:cache-index:tag:collections",
            ]
        );

        let list = c.cache_key(CacheScope::TagSearch, None, Some("q=ber"));
        assert_eq!(
            c.index_sets_for(&list),
            vec!["taxo:cache-index:tag:all", "taxo:cache-index:tag:collections"]
        );
    }

    #[test]
    fn invalidation_targets() {
        let c = codec();
        assert_eq!(
            c.invalidation_sets(EntityClass::Tag, Some("berlin")),
            vec![
                "taxo:cache-index:tag:entity:berlin",
                "taxo:cache-index:tag:collections"
            ]
        );
        assert_eq!(
            c.invalidation_sets(EntityClass::Category, None),
            vec!["taxo:cache-index:category:all"]
        );

        let patterns = c.invalidation_patterns(EntityClass::Tag, Some("a*b"));
        assert!(patterns.contains(&"taxo:cache:tag:a\\*b*".to_string()));
        assert!(patterns.contains(&"taxo:cache:tag:*".to_string()));
        assert!(patterns.contains(&"taxo:cache:tags:all:*".to_string()));
        assert!(patterns.contains(&"taxo:cache:category:*".to_string()));
        assert!(!patterns.iter().any(|p| p.contains("subcategories")));

        let patterns = c.invalidation_patterns(EntityClass::Category, None);
        assert_eq!(
            patterns,
            vec![
                "taxo:cache:categories:all:*",
                "taxo:cache:category:*",
                "taxo:cache:subcategories:*"
            ]
        );
    }

    #[test]
    fn shared_sets_cover_every_class() {
        assert_eq!(
            codec().shared_index_sets(),
            vec![
                "taxo:cache-index:tag:all",
                "taxo:cache-index:tag:collections",
                "taxo:cache-index:category:all",
                "taxo:cache-index:category:collections",
            ]
        );
    }

    #[test]
    fn ttl_tiers_map_to_config() {
        let ttl = CacheTtlConfig::default();
        assert_eq!(CacheScope::TagSearch.tier().duration(&ttl), Duration::from_secs(600));
        assert_eq!(CacheScope::TagList.tier().duration(&ttl), Duration::from_secs(1800));
        assert_eq!(
            CacheScope::Subcategories.tier().duration(&ttl),
            Duration::from_secs(3600)
        );
        assert_eq!(TtlTier::longest(&ttl), Duration::from_secs(3600));
    }
}
