//! Query keys, list parameters and page shapes
//!
//! A key is `[namespace]`, `[namespace, kind]` or `[namespace, kind, param]`.
//! Shorter keys act as prefixes when invalidating. Parameters are stored as
//! canonical JSON (sorted keys, nulls dropped) so two equal parameter sets
//! always produce the same key regardless of field order.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    List,
    Detail,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::List => "list",
            QueryKind::Detail => "detail",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    namespace: String,
    kind: Option<QueryKind>,
    param: Option<String>,
}

impl QueryKey {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn kind(&self) -> Option<QueryKind> {
        self.kind
    }

    /// Canonical JSON of the list params or detail id, for exact keys.
    pub fn param(&self) -> Option<&str> {
        self.param.as_deref()
    }

    /// Whether `other` equals this key or extends it.
    pub fn matches(&self, other: &QueryKey) -> bool {
        self.namespace == other.namespace
            && self.kind.is_none_or(|kind| other.kind == Some(kind))
            && self
                .param
                .as_ref()
                .is_none_or(|param| other.param.as_ref() == Some(param))
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}", Value::String(self.namespace.clone()))?;
        if let Some(kind) = self.kind {
            write!(f, ",\"{}\"", kind.as_str())?;
        }
        if let Some(param) = &self.param {
            write!(f, ",{param}")?;
        }
        f.write_str("]")
    }
}

/// Key factory for one namespace.
#[derive(Debug, Clone)]
pub struct QueryKeys {
    namespace: String,
}

impl QueryKeys {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    fn key(&self, kind: Option<QueryKind>, param: Option<String>) -> QueryKey {
        QueryKey {
            namespace: self.namespace.clone(),
            kind,
            param,
        }
    }

    pub fn all(&self) -> QueryKey {
        self.key(None, None)
    }

    pub fn lists(&self) -> QueryKey {
        self.key(Some(QueryKind::List), None)
    }

    pub fn list(&self, params: &ListParams) -> QueryKey {
        self.key(Some(QueryKind::List), Some(params.canonical()))
    }

    pub fn details(&self) -> QueryKey {
        self.key(Some(QueryKind::Detail), None)
    }

    pub fn detail(&self, id: &str) -> QueryKey {
        self.key(
            Some(QueryKind::Detail),
            Some(Value::String(id.to_string()).to_string()),
        )
    }
}

/// Serialize a JSON value with sorted object keys and `null` members removed.
pub fn canonical_json(value: &Value) -> String {
    canonicalize(value).to_string()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> = map
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, canonicalize(v)))
                .collect();
            Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), v)).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// List query parameters. Pages are 1-indexed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// Extra resource-specific filters, sent as plain query params.
    #[serde(flatten)]
    pub filters: BTreeMap<String, String>,
}

impl ListParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn search(mut self, q: impl Into<String>) -> Self {
        self.q = Some(q.into());
        self
    }

    pub fn cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn filter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(name.into(), value.into());
        self
    }

    /// Search term, if set and non-empty.
    pub fn search_term(&self) -> Option<&str> {
        self.q.as_deref().filter(|q| !q.is_empty())
    }

    /// Canonical JSON form used in query keys.
    pub fn canonical(&self) -> String {
        let mut map = Map::new();
        for (name, value) in &self.filters {
            map.insert(name.clone(), Value::String(value.clone()));
        }
        if let Some(page) = self.page {
            map.insert("page".into(), page.into());
        }
        if let Some(limit) = self.limit {
            map.insert("limit".into(), limit.into());
        }
        if let Some(q) = &self.q {
            map.insert("q".into(), Value::String(q.clone()));
        }
        if let Some(cursor) = &self.cursor {
            map.insert("cursor".into(), Value::String(cursor.clone()));
        }
        canonical_json(&Value::Object(map))
    }
}

/// List response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            pagination: None,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: Clone> Page<T> {
    /// Copy of this page with the matching items removed.
    pub fn without(&self, mut remove: impl FnMut(&T) -> bool) -> Self {
        Self {
            items: self.items.iter().filter(|item| !remove(item)).cloned().collect(),
            pagination: self.pagination.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub total_pages: Option<u64>,
    #[serde(default)]
    pub has_next: Option<bool>,
    #[serde(default)]
    pub has_previous: Option<bool>,
    #[serde(default)]
    pub cursor: Option<String>,
    /// Outer `None`: field absent. `Some(None)`: explicit `null`, meaning
    /// cursor pagination with no further page.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub next_cursor: Option<Option<String>>,
    #[serde(default)]
    pub prev_cursor: Option<String>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
